//! Decomposition prompts and their response parsers.

use serde_json::Value;

use crate::task::TaskNature;
use crate::util::fill_template;

/// Header the simplified decomposition prompt asks the model to put before
/// every sub-task.
pub const SUB_TASK_HEADER: &str = "[SUB-QUESTION/PROBLEM/TASK]";

/// Header used for evaluation criteria of an assessment.
pub const CRITERION_HEADER: &str = "[CRITERION]";

const RESOURCE_OVERVIEW_SECTION: &str = "Consider that you can access resources summarized in the below dictionary,
in which each key is a resource's unique name and the corresponding value is that resource's overview:

```json
{resource_overviews}
```

";

const HTP_JSON_SHAPE: &str = r#"{
    "task": {
        "ask": "(textual description of question/problem/task to answer/solve)"
    },
    "sub-htps": [
        {
            "task": {
                "ask": "(textual description of first sub-question/problem/task to answer/solve)",
                "nature": "(one of: retrieval, calculation, assessment)",
                "resources": [
                    (... unique names of most relevant informational resources, if any ...)
                ]
            },
            "sub-htps": []
        },
        ...
    ]
}"#;

const HTP_PROMPT: &str = "Using the following JSON hierarchical task plan dictionary data structure:

{shape}

please return a suggested hierarchical task plan with a single level of decomposition \
and at most {max_subtasks} sub-tasks for the following question/problem/task:

```
{problem}
```

Please return ONLY the JSON DICTIONARY and no other text, not even the \"```json\" wrapping!
";

const SIMPLIFIED_DECOMPOSITION_PROMPT: &str = "and consider that you are trying to solve the following top-level question/problem/task:

```
{problem}
```

please return a sequence of up to {max_subtasks} sentences/paragraphs,
EACH PREPENDED by a header \"[SUB-QUESTION/PROBLEM/TASK]\" (EXACTLY LITERALLY THAT STRING! DO NOT SUBSTITUTE THAT STRING!),
describing how such top-level question/problem/task could/should be decomposed into sub-questions/problems/tasks,
per the following template:

```
[SUB-QUESTION/PROBLEM/TASK]
<textual description of a sub-question/problem/task to answer/solve>
[SUB-QUESTION/PROBLEM/TASK]
<textual description of another sub-question/problem/task to answer/solve>
...
```

Please return ONLY the SEQUENCE OF SENTENCES/PARAGRAPHS WITH SUCH HEADERS, and no other text.
";

const CRITERIA_PROMPT: &str = "Consider that you need to make the following assessment:

```
{problem}
```

please list up to {max_subtasks} distinct evaluation criteria that such an assessment should be judged against,
EACH PREPENDED by a header \"[CRITERION]\" (EXACTLY LITERALLY THAT STRING!), per the following template:

```
[CRITERION]
<short description of a criterion>
[CRITERION]
<short description of another criterion>
...
```

Please return ONLY the CRITERIA WITH SUCH HEADERS, and no other text.
";

fn overview_section(resource_overviews: &[(String, String)]) -> String {
    if resource_overviews.is_empty() {
        return String::new();
    }
    let map: serde_json::Map<String, Value> = resource_overviews
        .iter()
        .map(|(name, overview)| (name.clone(), Value::String(overview.clone())))
        .collect();
    let rendered =
        serde_json::to_string_pretty(&Value::Object(map)).unwrap_or_else(|_| "{}".to_string());
    fill_template(RESOURCE_OVERVIEW_SECTION, &[("resource_overviews", rendered.as_str())])
}

pub fn htp_prompt(problem: &str, resource_overviews: &[(String, String)], max_subtasks: usize) -> String {
    let max_subtasks = max_subtasks.to_string();
    let body = fill_template(
        HTP_PROMPT,
        &[
            ("shape", HTP_JSON_SHAPE),
            ("max_subtasks", max_subtasks.as_str()),
            ("problem", problem),
        ],
    );
    format!("{}{}", overview_section(resource_overviews), body)
}

pub fn simplified_decomposition_prompt(
    problem: &str,
    resource_overviews: &[(String, String)],
    max_subtasks: usize,
) -> String {
    let max_subtasks = max_subtasks.to_string();
    let body = fill_template(
        SIMPLIFIED_DECOMPOSITION_PROMPT,
        &[("max_subtasks", max_subtasks.as_str()), ("problem", problem)],
    );
    let section = overview_section(resource_overviews);
    if section.is_empty() {
        // Drop the leading "and " when there is nothing to continue from.
        body.trim_start_matches("and ").to_string()
    } else {
        format!("{}{}", section, body)
    }
}

pub fn criteria_prompt(problem: &str, max_subtasks: usize) -> String {
    let max_subtasks = max_subtasks.to_string();
    fill_template(
        CRITERIA_PROMPT,
        &[("max_subtasks", max_subtasks.as_str()), ("problem", problem)],
    )
}

/// A sub-task proposed by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedTask {
    pub ask: String,
    pub nature: Option<TaskNature>,
    pub resources: Vec<String>,
}

/// Extract the first-level sub-tasks from a JSON hierarchical task plan.
///
/// Tolerates code fences and prose around the JSON object. Returns `None`
/// when no usable sub-task list is found.
pub fn parse_htp(response: &str) -> Option<Vec<ProposedTask>> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&response[start..=end]).ok()?;
    let subs = value.get("sub-htps")?.as_array()?;
    let tasks: Vec<ProposedTask> = subs.iter().filter_map(proposed_task).collect();
    if tasks.is_empty() {
        None
    } else {
        Some(tasks)
    }
}

fn proposed_task(sub: &Value) -> Option<ProposedTask> {
    let task = sub.get("task")?;
    if let Some(ask) = task.as_str() {
        return non_empty(ask).map(|ask| ProposedTask {
            ask,
            nature: None,
            resources: Vec::new(),
        });
    }
    let ask = non_empty(task.get("ask")?.as_str()?)?;
    let nature = task
        .get("nature")
        .and_then(Value::as_str)
        .and_then(|n| n.parse().ok());
    let resources = task
        .get("resources")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(ProposedTask {
        ask,
        nature,
        resources,
    })
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split a response on `header`, returning the non-empty sections after
/// each occurrence.
pub fn parse_headed_list(response: &str, header: &str) -> Vec<String> {
    response
        .split(header)
        .skip(1)
        .filter_map(|section| {
            let text = section
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with("```"))
                .collect::<Vec<_>>()
                .join(" ");
            non_empty(&text)
        })
        .collect()
}
