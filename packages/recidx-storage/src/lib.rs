//! Persistent storage for the record index maintenance engine.
//!
//! Currently one concern lives here: the dependency map ("deref
//! map"), a persistent multimap recording which records were read
//! while building other records' index entries, so that a change to
//! a source record can re-trigger indexing of everything that
//! denormalized data from it.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::{DependantCursor, DependencyEntry, DependencyMap};
pub use error::StorageError;
pub use infrastructure::sqlite::SqliteDependencyMap;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
