//! Error types for gpuq

use thiserror::Error;

/// Main error type for gpuq
#[derive(Error, Debug)]
pub enum GpuqError {
    /// Request failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Task does not exist
    #[error("Task {0} not found")]
    NotFound(i64),

    /// Operation not allowed in the task's current status
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// GPU inventory could not be collected
    #[error("GPU probe unavailable: {0}")]
    ProbeUnavailable(String),

    /// Task could not be launched into a session
    #[error("Launch failure: {0}")]
    Launch(String),

    /// A session disappeared without a recorded exit
    #[error("Session lost: {0}")]
    SessionLost(String),

    /// Durable store error
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for gpuq operations
pub type GpuqResult<T> = Result<T, GpuqError>;

impl From<toml::de::Error> for GpuqError {
    fn from(err: toml::de::Error) -> Self {
        GpuqError::Config(err.to_string())
    }
}
