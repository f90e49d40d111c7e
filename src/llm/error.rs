//! Typed errors for provider calls
//!
//! Lets callers distinguish upstream failure modes without string
//! matching: auth problems, rate limiting, transient server trouble.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Upstream rejected our credentials (HTTP 401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Upstream quota exhausted (HTTP 429); retry after a delay
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Malformed request (HTTP 400); caller bug, do not retry
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Transient server-side issue (HTTP 5xx)
    #[error("Service error: {0}")]
    ServiceError(String),

    /// Connection refused, timeout and friends
    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::ServiceError(_) | LlmError::Network(_)
        )
    }

    /// Convert HTTP status code and error text into a typed error
    pub fn from_http_status(status: reqwest::StatusCode, error_text: String) -> Self {
        match status.as_u16() {
            401 => LlmError::Unauthorized(error_text),
            429 => LlmError::RateLimited(error_text),
            400 => LlmError::BadRequest(error_text),
            500..=599 => LlmError::ServiceError(error_text),
            _ => LlmError::Other(anyhow::anyhow!("HTTP {}: {}", status, error_text)),
        }
    }

    /// Convert network/connection errors into a typed error
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            LlmError::Network(format!("Connection failed: {}", e))
        } else if let Some(status) = e.status() {
            Self::from_http_status(status, e.to_string())
        } else {
            LlmError::Other(e.into())
        }
    }
}
