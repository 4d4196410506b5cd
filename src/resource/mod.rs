//! Knowledge resources.
//!
//! A resource wraps one knowledge source behind a fixed capability: answer a
//! question, summarize itself. The reasoner only ever talks to
//! [`Resource`]; the shipped variants are:
//!
//! - [`DocumentResource`] - text/markdown files under a directory
//! - [`DatabaseResource`] - SQLite with a fixed query
//! - [`WebResource`] - web search (Tavily or DuckDuckGo)
//! - [`SensorResource`] - a bounded ring of timestamped readings

mod database;
mod document;
mod registry;
mod sensor;
mod web;

pub use database::DatabaseResource;
pub use document::DocumentResource;
pub use registry::ResourceRegistry;
pub use sensor::{Reading, SensorResource};
pub use web::WebResource;

use std::time::Duration;

use async_trait::async_trait;

use crate::task::TaskNature;

/// Variant tag of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Document,
    Database,
    Web,
    Sensor,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ResourceKind::Document => "document",
            ResourceKind::Database => "database",
            ResourceKind::Web => "web",
            ResourceKind::Sensor => "sensor",
        };
        f.write_str(label)
    }
}

/// A resource could not produce an answer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResourceError {
    #[error("Resource {resource} unavailable: {reason}")]
    Unavailable { resource: String, reason: String },

    #[error("Resource {resource} timed out after {after:?}")]
    Timeout { resource: String, after: Duration },
}

impl ResourceError {
    pub fn unavailable(resource: &str, reason: impl std::fmt::Display) -> Self {
        ResourceError::Unavailable {
            resource: resource.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A queryable knowledge source.
///
/// `answer` and `summarize` return explanatory text when nothing relevant is
/// found; `Err` is reserved for an unreachable source.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Stable identity key within a registry.
    fn unique_name(&self) -> &str;

    /// Informative name; may repeat across resources.
    fn name(&self) -> &str {
        self.unique_name()
    }

    fn kind(&self) -> ResourceKind;

    /// Whether this resource is worth consulting for tasks of `nature`.
    fn supports(&self, _nature: TaskNature) -> bool {
        true
    }

    async fn answer(&self, question: &str, n_words: usize) -> Result<String, ResourceError>;

    async fn summarize(&self) -> Result<String, ResourceError>;

    /// Short description of what the resource knows.
    async fn overview(&self) -> Result<String, ResourceError> {
        self.summarize().await
    }

    fn full_name(&self) -> String {
        format!(
            "RESOURCE NAMED \"{}\" (UNIQUELY NAMED \"{}\")",
            self.name(),
            self.unique_name()
        )
    }

    /// The answer framed with the resource's overview, for prompts that
    /// need to know where an answer comes from.
    async fn present_full_answer(
        &self,
        question: &str,
        n_words: usize,
    ) -> Result<String, ResourceError> {
        let overview = self.overview().await?;
        let answer = self.answer(question, n_words).await?;
        Ok(format!(
            "{full_name}\nOVERVIEW:\n{overview}\n\nQUESTION:\n{question}\n\nANSWER:\n{answer}\n",
            full_name = self.full_name(),
        ))
    }
}
