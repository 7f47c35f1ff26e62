//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Hub error.
    #[error("hub error: {0}")]
    Hub(#[from] tablewatch_core::Error),

    /// The change feed stopped on an error.
    #[error("change feed failed: {0}")]
    Feed(String),

    /// A background task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Snapshot encoding error.
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, Error>;
