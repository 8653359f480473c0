//! Shard selection: deterministic routing of a record id to one of
//! the configured index partitions.

mod selector;

pub use selector::{ShardSelector, ShardSelectorError};
