//! Error types for recidx-engine.
//!
//! One unified error for everything that can escape `process_event`;
//! the deliberate failure classes (ignore / block-and-retry / skip /
//! fail) are a matter of where an error is caught, not of its type;
//! see the updater module.

use thiserror::Error;

use crate::features::conf::ConfError;
use crate::features::model::ModelError;
use crate::features::sharding::ShardSelectorError;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Dependency map / storage error
    #[error("storage error: {0}")]
    Storage(#[from] recidx_storage::StorageError),

    /// Change-log payload codec error
    #[error("event codec error: {0}")]
    Codec(#[from] recidx_model::EventCodecError),

    /// Malformed change-log key
    #[error("record id error: {0}")]
    RecordId(#[from] recidx_model::RecordIdParseError),

    /// Indexer configuration error
    #[error("configuration error: {0}")]
    Conf(#[from] ConfError),

    /// Shard selection error
    #[error("shard selection error: {0}")]
    ShardSelection(#[from] ShardSelectorError),

    /// Search backend (tantivy) error
    #[error("search backend error: {0}")]
    SearchBackend(String),

    /// Lock acquisition/release error
    #[error("index lock error: {0}")]
    Lock(String),

    /// Follow-up event publication error
    #[error("event publish error: {0}")]
    Publish(String),

    /// Indexer model error
    #[error("indexer model error: {0}")]
    Model(#[from] ModelError),

    /// Cooperative stop requested while blocked
    #[error("interrupted")]
    Interrupted,
}

impl EngineError {
    pub fn search_backend(msg: impl Into<String>) -> Self {
        EngineError::SearchBackend(msg.into())
    }

    pub fn lock(msg: impl Into<String>) -> Self {
        EngineError::Lock(msg.into())
    }

    pub fn publish(msg: impl Into<String>) -> Self {
        EngineError::Publish(msg.into())
    }

    /// Interruption must be preserved, never absorbed: callers that
    /// catch-and-continue still rethrow when this is true.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, EngineError::Interrupted)
    }
}

impl From<tantivy::TantivyError> for EngineError {
    fn from(e: tantivy::TantivyError) -> Self {
        EngineError::SearchBackend(e.to_string())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
