//! Concurrent resource queries for the Observe step.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::resource::{Resource, ResourceError};

/// Per-query limits.
#[derive(Debug, Clone, Copy)]
pub struct QueryPolicy {
    pub timeout: Duration,
    /// Extra attempts after `ResourceError::Unavailable`
    pub retries: u32,
}

/// How a resource's answer is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStyle {
    /// The bare answer
    Plain,
    /// Framed with the resource's name and overview
    Framed,
}

/// Query every resource concurrently.
///
/// Results come back in the order of `resources`, whatever order the
/// queries finish in.
pub async fn query_all(
    resources: &[Arc<dyn Resource>],
    question: &str,
    n_words: usize,
    style: AnswerStyle,
    policy: QueryPolicy,
    cancel: &CancellationToken,
) -> Vec<Result<String, ResourceError>> {
    let queries = resources
        .iter()
        .map(|resource| query_one(resource.as_ref(), question, n_words, style, policy, cancel));
    join_all(queries).await
}

async fn query_one(
    resource: &dyn Resource,
    question: &str,
    n_words: usize,
    style: AnswerStyle,
    policy: QueryPolicy,
    cancel: &CancellationToken,
) -> Result<String, ResourceError> {
    let name = resource.unique_name();
    let mut attempt: u32 = 0;
    loop {
        let query = async {
            match style {
                AnswerStyle::Plain => resource.answer(question, n_words).await,
                AnswerStyle::Framed => resource.present_full_answer(question, n_words).await,
            }
        };
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ResourceError::unavailable(name, "cancelled")),
            outcome = tokio::time::timeout(policy.timeout, query) => outcome,
        };

        match outcome {
            Ok(Ok(answer)) => {
                tracing::debug!("Resource {} answered ({} chars)", name, answer.len());
                return Ok(answer);
            }
            // A timeout has already spent the query's budget.
            Err(_) => {
                let error = ResourceError::Timeout {
                    resource: name.to_string(),
                    after: policy.timeout,
                };
                tracing::warn!("{}", error);
                return Err(error);
            }
            Ok(Err(error)) if attempt < policy.retries => {
                attempt += 1;
                tracing::debug!(
                    "Retrying resource {} (attempt {}): {}",
                    name,
                    attempt + 1,
                    error
                );
            }
            Ok(Err(error)) => {
                tracing::warn!("{}; contributing no evidence", error);
                return Err(error);
            }
        }
    }
}
