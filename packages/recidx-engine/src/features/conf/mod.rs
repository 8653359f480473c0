//! Indexer configuration.
//!
//! Declarative JSON describing which records are indexed under which
//! vtags (the "index cases") and how index document fields are
//! derived from record fields, possibly dereferencing through linked
//! or variant records.

mod builder;
mod model;

pub use builder::IndexerConfBuilder;
pub use model::{CaseRule, ConfError, IndexField, IndexerConf};
