//! Dereference resolution.
//!
//! A dereferenced index field is built from a field of *another*
//! record, reached by walking a chain of follows from the record
//! being indexed. The records visited (and the fields read from
//! them) become dependency edges, so that changes to those records
//! re-trigger indexing of the dependant.

mod follow;

pub use follow::{resolve_index_value, DerefContext, Follow, Resolution};
