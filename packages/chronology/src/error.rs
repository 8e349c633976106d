//! Typed errors for the chronology library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while building a chronology.
#[derive(Debug, Error)]
pub enum ChronologyError {
    /// LLM call failed (after retries, where applicable)
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Exhibit input could not be normalized
    #[error("invalid exhibit: {reason}")]
    InvalidExhibit { reason: String },

    /// A single exhibit failed extraction
    #[error("exhibit {exhibit_id} failed: {reason}")]
    ExhibitFailed { exhibit_id: String, reason: String },

    /// Visit-type schema definition is invalid
    #[error("schema error: {0}")]
    Schema(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// The whole run exceeded its time budget
    #[error("chronology generation timed out after {0:?}")]
    Timeout(Duration),

    /// A task panicked; the panic payload is captured as text
    #[error("extraction panicked: {0}")]
    Panicked(String),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Category of an LLM provider failure.
///
/// The first three kinds are transient; the retry layer backs off and
/// tries again. Everything else fails fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    /// Provider is throttling requests (HTTP 429 and friends)
    Throttling,
    /// Provider is temporarily unavailable or overloaded
    ServiceUnavailable,
    /// Request or model timed out
    Timeout,
    /// Credentials rejected
    Authentication,
    /// Request rejected as malformed (payload too large, bad params)
    InvalidRequest,
    /// Transport failure before a response was received
    Network,
    /// Response arrived but could not be understood
    InvalidResponse,
    /// Anything else
    Other,
}

impl LlmErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Throttling => "throttling",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Timeout => "timeout",
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid_request",
            Self::Network => "network",
            Self::InvalidResponse => "invalid_response",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by an [`LlmClient`](crate::traits::llm::LlmClient).
///
/// Carries the declared kind, the provider's message, and the provider's
/// own error code when one was returned (e.g. `ThrottlingException`).
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub code: Option<String>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    /// Attach the provider-specific error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn throttling(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Throttling, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServiceUnavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Timeout, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidRequest, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Other, message)
    }
}

/// Result type alias for chronology operations.
pub type Result<T> = std::result::Result<T, ChronologyError>;

/// Result type alias for LLM port calls.
pub type LlmResult<T> = std::result::Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::throttling("slow down").with_code("ThrottlingException");
        assert_eq!(err.to_string(), "throttling: slow down");
        assert_eq!(err.code.as_deref(), Some("ThrottlingException"));
    }

    #[test]
    fn test_llm_error_converts_into_chronology_error() {
        let err: ChronologyError = LlmError::other("boom").into();
        assert!(matches!(err, ChronologyError::Llm(_)));
        assert_eq!(err.to_string(), "LLM error: other: boom");
    }
}
