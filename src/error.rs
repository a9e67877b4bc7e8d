//! Error types for Quotaguard.
//!
//! Quota exhaustion and missing identity are ordinary outcomes and are
//! reported through [`crate::ratelimit::Decision`], not through this type.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Quotaguard operations.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// The distributed store could not be reached or rejected the command
    #[error("Rate limit backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The distributed store did not answer within the configured bound
    #[error("Rate limit backend timed out after {0:?}")]
    BackendTimeout(Duration),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for QuotaError {
    fn from(err: redis::RedisError) -> Self {
        QuotaError::BackendUnavailable(err.to_string())
    }
}

/// Result type alias for Quotaguard operations.
pub type Result<T> = std::result::Result<T, QuotaError>;
