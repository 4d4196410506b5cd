//! Consolidation of several answers into one bounded-length answer.
//!
//! The prompt shape depends on which inputs are present:
//!
//! | resource answers | other results | prompt |
//! |---|---|---|
//! | yes | no | resource answers only |
//! | yes | yes | resource answers plus auxiliary information |
//! | no | yes | auxiliary information only |
//! | no | no | the question asked directly |
//!
//! The word budget is advisory: it is stated in the prompt, not enforced on
//! the output.

mod prompts;

use crate::llm::{BackendError, LmBackend};
use crate::task::Evidence;

pub use prompts::build_prompt;
pub(crate) use prompts::{render_other_results, render_resource_answers};

/// Merges evidence into a final answer through the language model.
#[derive(Clone)]
pub struct Consolidator {
    llm: LmBackend,
}

impl Consolidator {
    pub fn new(llm: LmBackend) -> Self {
        Self { llm }
    }

    pub async fn consolidate(
        &self,
        question: &str,
        resource_answers: &[Evidence],
        other_results: &[Evidence],
        max_words: usize,
    ) -> Result<String, BackendError> {
        self.run(question, resource_answers, other_results, max_words, false)
            .await
    }

    /// Like [`consolidate`](Self::consolidate), but the model may ask for
    /// clarification instead of guessing.
    pub async fn consolidate_or_reject(
        &self,
        question: &str,
        resource_answers: &[Evidence],
        other_results: &[Evidence],
        max_words: usize,
    ) -> Result<String, BackendError> {
        self.run(question, resource_answers, other_results, max_words, true)
            .await
    }

    async fn run(
        &self,
        question: &str,
        resource_answers: &[Evidence],
        other_results: &[Evidence],
        max_words: usize,
        allow_reject: bool,
    ) -> Result<String, BackendError> {
        let prompt = build_prompt(
            question,
            resource_answers,
            other_results,
            max_words,
            allow_reject,
        );
        tracing::debug!(
            "Consolidating {} resource answers and {} other results for: {}",
            resource_answers.len(),
            other_results.len(),
            question
        );
        let answer = self.llm.complete(&prompt).await?;
        Ok(answer.trim().to_string())
    }
}
