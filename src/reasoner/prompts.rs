//! Orient/decide prompt and the confidence-tag contract.

use std::sync::LazyLock;

use regex::Regex;

use crate::util::fill_template;

pub const CONFIDENT_TAG: &str = "[CONFIDENT]";
pub const UNCONFIDENT_TAG: &str = "[UNCONFIDENT]";

/// Source label of the answer a node gave before it was decomposed.
pub const PRELIMINARY_SOURCE: &str = "REASONING WITHOUT SUPPORTING/OTHER RESULTS \
(preliminary conclusions here can be overridden by more convincing supporting/other data)";

const ORIENT_PROMPT: &str = "Assuming that the following question/problem/task is posed

```
{question}
```

and you have observed various answers/solutions from different informational resources as detailed below,
please evaluate whether you can answer/solve the posed question/problem/task confidently with concrete results.
If the question/problem/task mentions any RIGOROUS BASES/CRITERIA/DEFINITIONS for judgement,
the concrete results MUST RESPOND TO SUCH BASES/CRITERIA/DEFINITIONS for the answer/solution to be considered confident.
If the question/problem/task involves any NUMERICAL QUANTITIES (e.g., MULTIPLES or RATIOS) to be retrieved or calculated,
the concrete results MUST CONTAIN SPECIFIC VALUES for such quantities for the answer/solution to be considered confident.

Return your best-effort answer/solution of up to {n_words} words, covering reasoning flows and supporting details,
PREPENDING such answer/solution with the header \"[CONFIDENT]\" if you can answer/solve confidently with concrete results,
and with the header \"[UNCONFIDENT]\" otherwise.

```
{observations}
```
";

const NO_OBSERVATIONS: &str = "(no observations available; reason from general knowledge)";

// Leading tag, tolerating markdown emphasis and a trailing colon.
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*[*_`]*\[(UN)?CONFIDENT\][*_`]*:?\s*").expect("tag pattern compiles")
});

pub fn orient_prompt(question: &str, observations: &str, n_words: usize) -> String {
    let n_words = n_words.to_string();
    let observations = if observations.trim().is_empty() {
        NO_OBSERVATIONS
    } else {
        observations
    };
    fill_template(
        ORIENT_PROMPT,
        &[
            ("question", question),
            ("n_words", n_words.as_str()),
            ("observations", observations),
        ],
    )
}

/// Outcome of an orient/decide call, tag stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Orientation {
    Confident(String),
    Unconfident(String),
}

impl Orientation {
    pub fn is_confident(&self) -> bool {
        matches!(self, Orientation::Confident(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Orientation::Confident(text) | Orientation::Unconfident(text) => text,
        }
    }
}

/// Read the confidence tag off a backend response.
///
/// Only a leading `[CONFIDENT]` counts as confident. An untagged response
/// is unconfident and kept whole.
pub fn parse_orientation(response: &str) -> Orientation {
    match TAG.captures(response) {
        Some(caps) => {
            let body = response[caps.get(0).map_or(0, |m| m.end())..].trim().to_string();
            if caps.get(1).is_some() {
                Orientation::Unconfident(body)
            } else {
                Orientation::Confident(body)
            }
        }
        None => Orientation::Unconfident(response.trim().to_string()),
    }
}
