//! Error Handling Module
//!
//! One error enum for the whole crate, split along the failure classes the
//! orchestrator cares about: configuration problems are fatal and never
//! retried, transport problems are absorbed by the fallback loop, and
//! exhaustion carries the last underlying failure for diagnosis.

use thiserror::Error;

/// Errors produced by slugscout operations.
#[derive(Error, Debug, Clone)]
pub enum ScoutError {
    /// HTTP-level API error with status code
    #[error("API error {code}: {message}")]
    ApiError {
        code: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// Network / transport error (connection refused, timeout, TLS, ...)
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// A backend payload could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Missing or invalid configuration (credentials, base URLs)
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// No backend has any models to try. Fatal, not retryable.
    #[error("No models configured: {0}")]
    NoModelsConfigured(String),

    /// Every model in both the healthy and problematic tiers failed.
    #[error("All models failed; last error: {last_error}")]
    AllModelsFailed { attempts: usize, last_error: String },

    /// A requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller passed an invalid argument
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Invariant violation inside the crate
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ScoutError {
    /// Construct an API error from a status code and message.
    pub fn api_error(code: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// HTTP status code, when the error carries one.
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the fallback loop may try another model after this error.
    ///
    /// Configuration and caller errors are surfaced immediately; everything
    /// that originates from a specific backend call is absorbed by the loop.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ApiError { .. } | Self::HttpError(_) | Self::ParseError(_)
        )
    }
}

impl From<reqwest::Error> for ScoutError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::ApiError {
                code: status.as_u16(),
                message: err.to_string(),
                details: None,
            }
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ScoutError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_carries_status() {
        let err = ScoutError::api_error(429, "rate limited");
        assert_eq!(err.status_code(), Some(429));
        assert!(err.is_retryable());
    }

    #[test]
    fn configuration_errors_are_fatal() {
        let err = ScoutError::ConfigurationError("missing GROQ_API_KEY".into());
        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), None);
    }

    #[test]
    fn exhaustion_keeps_last_error() {
        let err = ScoutError::AllModelsFailed {
            attempts: 4,
            last_error: "API error 500: boom".into(),
        };
        assert!(err.to_string().contains("API error 500"));
    }
}
