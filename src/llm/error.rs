//! Backend error types with retry classification.
//!
//! Transient failures (rate limits, server errors, network trouble) are retried
//! by [`LmBackend`](super::LmBackend); everything else surfaces immediately as
//! [`BackendError::Unavailable`].

use std::time::Duration;

/// Error from a single language-model API call.
#[derive(Debug, Clone)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    /// HTTP status code, if the failure came from an HTTP response
    pub status_code: Option<u16>,
    pub message: String,
    /// Server-provided retry hint (`Retry-After`)
    pub retry_after: Option<Duration>,
}

impl LlmError {
    fn new(kind: LlmErrorKind, status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(LlmErrorKind::RateLimited, Some(429), message)
        }
    }

    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, Some(status_code), message)
    }

    pub fn client_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ClientError, Some(status_code), message)
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::NetworkError, None, message)
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ParseError, None, message)
    }

    /// Build the error matching an HTTP failure status.
    pub fn from_status(status_code: u16, body: &str, retry_after: Option<Duration>) -> Self {
        match classify_http_status(status_code) {
            LlmErrorKind::RateLimited => Self::rate_limited(body, retry_after),
            LlmErrorKind::ClientError => Self::client_error(status_code, body),
            _ => Self::server_error(status_code, body),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Delay before retry attempt `attempt` (zero-based).
    ///
    /// A `Retry-After` hint wins; otherwise exponential backoff from the
    /// configured base, scaled per error kind, plus a small deterministic
    /// jitter. Never exceeds `config.max_delay`.
    pub fn suggested_delay(&self, attempt: u32, config: &RetryConfig) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after.min(config.max_delay);
        }

        let kind_factor: u32 = match self.kind {
            LlmErrorKind::RateLimited => 4,
            LlmErrorKind::ServerError => 2,
            _ => 1,
        };
        let base = config.base_delay.saturating_mul(kind_factor);
        let backoff = base.saturating_mul(2u32.saturating_pow(attempt));

        let jitter_range = backoff.as_millis() as u64 / 4;
        let jitter = if jitter_range > 0 {
            Duration::from_millis((attempt as u64 * 7) % jitter_range)
        } else {
            Duration::ZERO
        };

        backoff.saturating_add(jitter).min(config.max_delay)
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Classification of backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429
    RateLimited,
    /// 5xx
    ServerError,
    /// 4xx other than 429; retrying the same request will not help
    ClientError,
    /// Connection failure or timeout
    NetworkError,
    /// Response body could not be understood
    ParseError,
}

impl LlmErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LlmErrorKind::RateLimited => "Rate limited",
            LlmErrorKind::ServerError => "Server error",
            LlmErrorKind::ClientError => "Client error",
            LlmErrorKind::NetworkError => "Network error",
            LlmErrorKind::ParseError => "Parse error",
        };
        f.write_str(label)
    }
}

/// Retry policy applied at every backend call site.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_rate_limits: bool,
    pub retry_server_errors: bool,
    pub retry_network_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            retry_rate_limits: true,
            retry_server_errors: true,
            retry_network_errors: true,
        }
    }
}

impl RetryConfig {
    /// Policy with no waiting between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, error: &LlmError) -> bool {
        match error.kind {
            LlmErrorKind::RateLimited => self.retry_rate_limits,
            LlmErrorKind::ServerError => self.retry_server_errors,
            LlmErrorKind::NetworkError => self.retry_network_errors,
            LlmErrorKind::ClientError | LlmErrorKind::ParseError => false,
        }
    }
}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

/// The backend could not produce a completion within the retry budget.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Language-model backend unavailable after {attempts} attempt(s): {message}")]
    Unavailable { attempts: u32, message: String },
}
