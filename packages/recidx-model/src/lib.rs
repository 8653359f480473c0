//! Shared data model for the record index maintenance engine.
//!
//! Single source of truth for the identity types (`RecordId`,
//! `AbsoluteRecordId`, `SchemaId`), the record field-state model, and
//! the change-log `RecordEvent` with its wire codec. Both the engine
//! and the storage backends depend on this crate; it depends on
//! nothing but serde and the codec.

pub mod event;
pub mod record;
pub mod record_id;
pub mod schema;

pub use event::{EventCodecError, IndexFilterData, RecordEvent, RecordEventType};
pub use record::{FieldValue, Record};
pub use record_id::{AbsoluteRecordId, RecordId, RecordIdParseError};
pub use schema::{last_vtag_id, FieldType, SchemaId, Scope, LAST_VTAG_NAME};

use std::collections::BTreeSet;

/// The resolved indexing rule for a record: the set of version tags
/// whose index entries must be maintained.
///
/// An empty tag set is meaningful: the record is tracked only as a
/// source of denormalized data and is never indexed directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCase {
    version_tags: BTreeSet<SchemaId>,
}

impl IndexCase {
    pub fn new(version_tags: BTreeSet<SchemaId>) -> Self {
        Self { version_tags }
    }

    pub fn version_tags(&self) -> &BTreeSet<SchemaId> {
        &self.version_tags
    }
}
