//! Error types for recidx-storage.

use thiserror::Error;

/// Main error type for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Corrupt or unreadable stored data
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    /// Cursor used after close
    #[error("cursor is closed")]
    CursorClosed,
}

impl StorageError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        StorageError::Corrupt(msg.into())
    }
}
