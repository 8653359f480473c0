//! Incremental search-index maintenance engine.
//!
//! Mirrors a versioned, multi-tenant record store into a tantivy
//! index by reacting to change-log events. The heart of the crate is
//! the [`features::updater::IndexUpdater`] state machine, fed by the
//! change-log consumer, which drives the
//! [`features::indexer::Indexer`] and propagates denormalized-data
//! invalidations through the dependency map.

pub mod errors;
pub mod features;
pub mod metrics;
pub mod stop;

pub use errors::{EngineError, Result};
pub use stop::StopSignal;
