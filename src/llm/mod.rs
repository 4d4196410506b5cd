//! Language-model backend.
//!
//! The orchestration core only needs one capability from the model: given a
//! prompt, return text. [`LlmClient`] abstracts the provider (OpenRouter is the
//! shipped implementation) and [`LmBackend`] wraps a client with the retry
//! policy and the caller-configured concurrency ceiling.

mod backend;
mod error;
mod openrouter;

pub use backend::LmBackend;
pub use error::{classify_http_status, BackendError, LlmError, LlmErrorKind, RetryConfig};
pub use openrouter::OpenRouterClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// One completion. `finish_reason` is `"length"` when the provider cut the
/// answer short.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    pub fn was_truncated(&self) -> bool {
        self.finish_reason.as_deref() == Some("length")
    }
}

/// Sampling parameters forwarded to the provider.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub seed: Option<u64>,
}

impl ChatOptions {
    /// Temperature zero with a fixed seed, so repeated solves plan alike.
    pub fn deterministic() -> Self {
        Self {
            temperature: Some(0.0),
            seed: Some(7 * 17 * 14717),
            max_tokens: None,
        }
    }
}

/// A chat-completion provider.
///
/// Implementations perform exactly one request per call; retrying is the
/// caller's concern (see [`LmBackend`]).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, LlmError>;
}
