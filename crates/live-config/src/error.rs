//! Error types for the live config mirror.

use std::time::Duration;
use thiserror::Error;

/// Live config error type.
#[derive(Error, Debug)]
pub enum LiveConfigError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON encoding error (broadcast payloads)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A store operation did not complete in time
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation requires a started mirror
    #[error("Live config has not been started")]
    NotStarted,

    /// `start` called while a previous `start` is still running
    #[error("Live config is already starting")]
    AlreadyStarting,

    /// A store connection or background task went away
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Failure reported by a non-Redis store backend
    #[error("Store error: {0}")]
    Store(String),
}

/// Result type for live config operations.
pub type LiveConfigResult<T> = Result<T, LiveConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = LiveConfigError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Store operation timed out after 250ms");
    }

    #[test]
    fn test_json_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: LiveConfigError = json_err.into();
        assert!(matches!(err, LiveConfigError::Json(_)));
    }
}
