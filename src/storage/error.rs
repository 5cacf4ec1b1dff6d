//! Message store error types

use thiserror::Error;

/// Errors that can occur while persisting or reading messages
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite operation failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded
    #[error("Corrupt row: {0}")]
    Corruption(String),

    /// The blocking task running the query panicked or was cancelled
    #[error("Store task failed: {0}")]
    Task(String),

    /// The store cannot serve requests right now
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
