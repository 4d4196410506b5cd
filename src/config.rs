//! Configuration management for the OODA agent.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Required. Your OpenRouter API key.
//! - `DEFAULT_MODEL` - Optional. Model used for every backend call. Defaults to `openai/gpt-4o`.
//! - `MAX_DEPTH` - Optional. Task-tree depth budget. Defaults to `2`.
//! - `MAX_SUBTASKS_PER_DECOMP` - Optional. Children per decomposition. Defaults to `4`.
//! - `N_WORDS` - Optional. Word budget for answers. Defaults to `1000`.
//! - `RESOURCE_TIMEOUT_SECS` - Optional. Per-resource-query timeout. Defaults to `60`.
//! - `RESOURCE_RETRIES` - Optional. Extra attempts for an unavailable resource. Defaults to `1`.
//! - `LLM_CONCURRENCY` - Optional. Concurrent backend requests. Defaults to `4`.
//! - `LLM_MAX_RETRIES` - Optional. Backend retries on transient errors. Defaults to `3`.
//! - `SEQUENTIAL_SIBLINGS` - Optional. Resolve siblings one by one, sharing results. Defaults to `false`.
//! - `PROGRAM_STORE_PATH` - Optional. JSON file for durable programs.
//! - `KNOWLEDGE_PATH` - Optional. Text file injected as domain knowledge into every backend request.
//! - `DOCS_PATH` - Optional. Directory served as a document resource.
//! - `SQLITE_PATH` / `SQLITE_QUERY` - Optional. Database resource (both required to enable).
//! - `WEB_SEARCH` - Optional. Register the web search resource. Defaults to `true`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::util::env_var_bool;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Knobs consumed by the planner, reasoner and façade.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum depth of any task tree (root is depth 0)
    pub max_depth: usize,

    /// Maximum children created by one decomposition
    pub max_subtasks_per_decomp: usize,

    /// Word budget communicated to the backend
    pub n_words: usize,

    /// Timeout applied to every single resource query
    pub resource_timeout: Duration,

    /// Extra attempts after a resource reports itself unavailable
    pub resource_retries: u32,

    /// Resolve siblings sequentially, passing earlier results to later ones
    pub sequential_siblings: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_subtasks_per_decomp: 4,
            n_words: 1000,
            resource_timeout: Duration::from_secs(60),
            resource_retries: 1,
            sequential_siblings: false,
        }
    }
}

/// Resources the binary registers at startup.
#[derive(Debug, Clone, Default)]
pub struct ResourceSources {
    pub docs_path: Option<PathBuf>,
    pub sqlite_path: Option<PathBuf>,
    pub sqlite_query: Option<String>,
    pub web_search: bool,
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key
    pub api_key: String,

    /// LLM model identifier (OpenRouter format)
    pub default_model: String,

    /// Backend concurrency ceiling
    pub llm_concurrency: usize,

    /// Backend retries on transient failures
    pub llm_max_retries: u32,

    /// Durable program store location; in-memory when unset
    pub program_store_path: Option<PathBuf>,

    /// Domain knowledge file sent as a system message
    pub knowledge_path: Option<PathBuf>,

    pub agent: AgentConfig,

    pub sources: ResourceSources,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set,
    /// `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let default_model =
            std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| "openai/gpt-4o".to_string());

        let defaults = AgentConfig::default();
        let agent = AgentConfig {
            max_depth: parse_env("MAX_DEPTH", defaults.max_depth)?,
            max_subtasks_per_decomp: parse_env(
                "MAX_SUBTASKS_PER_DECOMP",
                defaults.max_subtasks_per_decomp,
            )?,
            n_words: parse_env("N_WORDS", defaults.n_words)?,
            resource_timeout: Duration::from_secs(parse_env(
                "RESOURCE_TIMEOUT_SECS",
                defaults.resource_timeout.as_secs(),
            )?),
            resource_retries: parse_env("RESOURCE_RETRIES", defaults.resource_retries)?,
            sequential_siblings: env_var_bool("SEQUENTIAL_SIBLINGS", defaults.sequential_siblings),
        };

        if agent.max_subtasks_per_decomp == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_SUBTASKS_PER_DECOMP".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let sources = ResourceSources {
            docs_path: std::env::var("DOCS_PATH").ok().map(PathBuf::from),
            sqlite_path: std::env::var("SQLITE_PATH").ok().map(PathBuf::from),
            sqlite_query: std::env::var("SQLITE_QUERY").ok(),
            web_search: env_var_bool("WEB_SEARCH", true),
        };

        Ok(Self {
            api_key,
            default_model,
            llm_concurrency: parse_env("LLM_CONCURRENCY", 4)?,
            llm_max_retries: parse_env("LLM_MAX_RETRIES", 3)?,
            program_store_path: std::env::var("PROGRAM_STORE_PATH").ok().map(PathBuf::from),
            knowledge_path: std::env::var("KNOWLEDGE_PATH").ok().map(PathBuf::from),
            agent,
            sources,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            default_model,
            llm_concurrency: 4,
            llm_max_retries: 3,
            program_store_path: None,
            knowledge_path: None,
            agent: AgentConfig::default(),
            sources: ResourceSources::default(),
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        self.agent.clone()
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_documented_defaults() {
        let config = Config::new("key".to_string(), "model".to_string());
        let agent = config.agent_config();
        assert_eq!(agent.max_depth, 2);
        assert_eq!(agent.max_subtasks_per_decomp, 4);
        assert_eq!(agent.n_words, 1000);
        assert!(!agent.sequential_siblings);
        assert!(config.program_store_path.is_none());
    }

    #[test]
    fn parse_env_falls_back_when_unset() {
        let value: usize = parse_env("OODA_AGENT_TEST_SURELY_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        std::env::set_var("OODA_AGENT_TEST_BAD_NUMBER", "seven");
        let result: Result<usize, _> = parse_env("OODA_AGENT_TEST_BAD_NUMBER", 7);
        std::env::remove_var("OODA_AGENT_TEST_BAD_NUMBER");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue(name, _)) if name == "OODA_AGENT_TEST_BAD_NUMBER"
        ));
    }
}
