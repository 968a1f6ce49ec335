//! Error types for the rate limiter.

use std::time::Duration;

use thiserror::Error;

/// Main error type for limiter construction and administration.
///
/// Admission decisions never surface through this type: a denial is a
/// [`Decision`](crate::ratelimit::Decision) with `allowed == false`.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rate limit policy that would break window arithmetic
    #[error("Invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    /// Metrics registry errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<config::ConfigError> for LimiterError {
    fn from(e: config::ConfigError) -> Self {
        LimiterError::Config(e.to_string())
    }
}

impl From<serde_yaml::Error> for LimiterError {
    fn from(e: serde_yaml::Error) -> Self {
        LimiterError::Config(e.to_string())
    }
}

/// Errors from a window store.
///
/// The facade recovers from all of these; they are only visible to callers
/// that drive a backend directly.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The store could not be reached or the command failed in transit
    #[error("Transport error: {0}")]
    Transport(String),

    /// The store did not answer within the configured timeout
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The local store refuses to track more keys
    #[error("Local store is full ({0} keys)")]
    Capacity(usize),

    /// The store answered with something the limiter cannot interpret
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for BackendError {
    fn from(e: redis::RedisError) -> Self {
        BackendError::Transport(e.to_string())
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
