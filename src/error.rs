//! Error types for Gatekeeper.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
///
/// Admission decisions themselves never fail; these errors surface only while
/// loading configuration or wiring a limiter to its store.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a counter store.
///
/// The fixed-window limiter treats every variant the same way: the request
/// is rejected.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or the connection dropped
    #[error("connection failed: {0}")]
    Connection(String),

    /// The store did not answer within the operation timeout
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The store answered with an error
    #[error("command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_io_error()
            || err.is_timeout()
        {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
