//! The indexer model: index definitions, their registry, and the
//! worker that keeps one running updater stack per live definition.

mod definition;
mod registry;
mod worker;

pub use definition::{IndexDefinition, IndexGeneralState, IndexUpdateState};
pub use registry::{IndexModelEvent, IndexModelListener, IndexerModel};
pub use worker::{IndexerWorker, UpdaterStackFactory};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("index '{0}' already exists")]
    IndexExists(String),

    #[error("index '{0}' does not exist")]
    IndexNotFound(String),

    #[error("index '{name}' was modified concurrently (stale data version {stale}, current {current})")]
    ConcurrentModification {
        name: String,
        stale: u64,
        current: u64,
    },

    #[error("invalid index definition: {0}")]
    Validation(String),
}
