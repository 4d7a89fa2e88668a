//! Error types for the Holdgate service.

use std::time::Duration;
use thiserror::Error;

/// Main error type for Holdgate operations.
///
/// Gate *verdicts* (missing identity, rate limited, gate closed) are not
/// errors; they are modeled by [`crate::gate::DenyReason`]. This type covers
/// infrastructure failure only, and the pipeline maps every variant to a
/// fail-closed deny.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backing store errors (connection, protocol, serialization)
    #[error("Store error: {0}")]
    Store(String),

    /// Backing store did not respond within the configured deadline
    #[error("Store timed out after {0:?}")]
    StoreTimeout(Duration),

    /// Upstream forwarding errors
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for GateError {
    fn from(e: redis::RedisError) -> Self {
        GateError::Store(e.to_string())
    }
}

/// Result type alias for Holdgate operations.
pub type Result<T> = std::result::Result<T, GateError>;
