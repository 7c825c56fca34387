//! Error types for session operations.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-specific errors.
///
/// A session that does not exist, has been deleted, or has expired is not
/// an error: those conditions surface as `Ok(None)` from the repository so
/// callers cannot distinguish "never existed" from "expired".
#[derive(Debug, Error)]
pub enum SessionError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Store transport/driver failure
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// Sweeper already running
    #[error("Expiration sweeper already running")]
    SweeperAlreadyRunning,

    /// Sweeper not running
    #[error("Expiration sweeper not running")]
    SweeperNotRunning,

    /// Generic error
    #[error("Session error: {0}")]
    Other(String),
}
