use crate::task::Evidence;
use crate::util::fill_template;

const RESOURCE_ANSWERS_PROMPT: &str = "Assuming that the following question/problem/task is posed

```
{question}
```

and you have received various answers/solutions from different informational resources as detailed below,
please consolidate within {n_words} words a final answer/solution that you believe is the most correct.
{reject}

```
{resources_and_answers}
```
";

const RESOURCE_ANSWERS_AND_OTHER_RESULTS_PROMPT: &str = "Assuming that the following question/problem/task is posed

```
{question}
```

and you have received various answers/solutions from different informational resources
as well as auxiliary information from other sources as detailed below,
please consolidate within {n_words} words a final answer/solution that you believe is the most correct.
{reject}

```
{resources_and_answers}


{other_results}
```
";

const OTHER_RESULTS_PROMPT: &str = "Assuming that the following question/problem/task is posed

```
{question}
```

and you have received auxiliary information from other sources as detailed below,
please consolidate within {n_words} words a final answer/solution that you believe is the most correct.
{reject}

```
{other_results}
```
";

const DIRECT_PROMPT: &str = "`[WITHIN {n_words} WORDS:]`\n{question}";

const REJECT_CLAUSE: &str = "If the information below is insufficient, or asks for clarification or more information, \
just request more information without doing anything else.\n";

pub(crate) fn render_resource_answers(answers: &[Evidence]) -> String {
    answers
        .iter()
        .map(|e| format!("{}:\n{}", e.source, e.answer.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub(crate) fn render_other_results(results: &[Evidence]) -> String {
    results
        .iter()
        .map(|e| {
            format!(
                "QUESTION/TASK:\n{}\n\nRESULT:\n{}",
                e.source.trim(),
                e.answer.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the consolidation prompt. The word budget appears exactly once.
pub fn build_prompt(
    question: &str,
    resource_answers: &[Evidence],
    other_results: &[Evidence],
    max_words: usize,
    allow_reject: bool,
) -> String {
    let template = match (resource_answers.is_empty(), other_results.is_empty()) {
        (false, true) => RESOURCE_ANSWERS_PROMPT,
        (false, false) => RESOURCE_ANSWERS_AND_OTHER_RESULTS_PROMPT,
        (true, false) => OTHER_RESULTS_PROMPT,
        (true, true) => DIRECT_PROMPT,
    };
    let reject = if allow_reject { REJECT_CLAUSE } else { "" };
    let n_words = max_words.to_string();
    let resources_and_answers = render_resource_answers(resource_answers);
    let other = render_other_results(other_results);

    fill_template(
        template,
        &[
            ("n_words", n_words.as_str()),
            ("reject", reject),
            ("question", question),
            ("resources_and_answers", resources_and_answers.as_str()),
            ("other_results", other.as_str()),
        ],
    )
}
