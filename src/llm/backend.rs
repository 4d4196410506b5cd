//! Rate-limited, retrying access to the language model.

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::error::{BackendError, RetryConfig};
use super::{ChatMessage, ChatOptions, LlmClient};
use crate::util::fill_template;

const KNOWLEDGE_INJECTION: &str = "PLEASE ADD THE FOLLOWING TO YOUR KNOWLEDGE TO BE USED IN PLANNING, REASONING & PROBLEM SOLVING:

START OF KNOWLEDGE PIECE >>>
****************************

{knowledge}

****************************
<<< END OF KNOWLEDGE PIECE
";

/// The `complete(prompt) -> text` capability used by every component.
///
/// # Invariants
/// - At most `concurrency` requests are in flight across all clones.
/// - Transient failures are retried per [`RetryConfig`]; the permit is not
///   held while backing off.
#[derive(Clone)]
pub struct LmBackend {
    client: Arc<dyn LlmClient>,
    model: String,
    options: ChatOptions,
    retry: RetryConfig,
    permits: Arc<Semaphore>,
    system_prompt: Option<String>,
}

impl LmBackend {
    /// Default ceiling on concurrent backend requests.
    pub const DEFAULT_CONCURRENCY: usize = 4;

    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            options: ChatOptions::deterministic(),
            retry: RetryConfig::default(),
            permits: Arc::new(Semaphore::new(Self::DEFAULT_CONCURRENCY)),
            system_prompt: None,
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the concurrency ceiling. Clones made afterwards share it.
    pub fn with_concurrency(mut self, max_in_flight: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max_in_flight.max(1)));
        self
    }

    /// Prepend a system message (e.g. domain knowledge) to every request.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Inject domain knowledge as a framed system message.
    pub fn with_knowledge(self, knowledge: &str) -> Self {
        let framed = fill_template(KNOWLEDGE_INJECTION, &[("knowledge", knowledge.trim())]);
        self.with_system_prompt(framed)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `prompt` and return the completion text.
    ///
    /// # Errors
    /// [`BackendError::Unavailable`] when a permanent error occurs or the
    /// retry budget is exhausted.
    pub async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        let mut attempt: u32 = 0;
        loop {
            let outcome = {
                let _permit =
                    self.permits
                        .acquire()
                        .await
                        .map_err(|_| BackendError::Unavailable {
                            attempts: attempt,
                            message: "backend permit pool closed".to_string(),
                        })?;
                self.client
                    .chat_completion(&self.model, &messages, &self.options)
                    .await
            };

            match outcome {
                Ok(response) => {
                    if response.was_truncated() {
                        tracing::warn!("Completion hit the provider's length limit");
                    }
                    if attempt > 0 {
                        tracing::info!("Backend request succeeded after {} retries", attempt);
                    }
                    return Ok(response.content.unwrap_or_default());
                }
                Err(error)
                    if self.retry.should_retry(&error) && attempt < self.retry.max_retries =>
                {
                    let delay = error.suggested_delay(attempt, &self.retry);
                    tracing::warn!(
                        "Backend attempt {} failed with {}, retrying in {:?}: {}",
                        attempt + 1,
                        error.kind,
                        delay,
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(
                        "Backend request failed after {} attempt(s): {}",
                        attempt + 1,
                        error
                    );
                    return Err(BackendError::Unavailable {
                        attempts: attempt + 1,
                        message: error.to_string(),
                    });
                }
            }
        }
    }
}
