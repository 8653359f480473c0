//! Record store and schema ports.

use std::collections::{BTreeSet, HashMap};

use recidx_model::{AbsoluteRecordId, FieldType, Record, RecordEvent, SchemaId};

use crate::Result;

/// Field schema registry: resolves field names from declarative
/// configuration to stable schema ids, and identifies vtag fields.
#[derive(Debug, Clone, Default)]
pub struct FieldTypes {
    by_id: HashMap<SchemaId, FieldType>,
    by_name: HashMap<String, SchemaId>,
}

impl FieldTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, field_type: FieldType) {
        self.by_name.insert(field_type.name.clone(), field_type.id);
        self.by_id.insert(field_type.id, field_type);
    }

    pub fn with(mut self, field_type: FieldType) -> Self {
        self.register(field_type);
        self
    }

    pub fn by_id(&self, id: &SchemaId) -> Option<&FieldType> {
        self.by_id.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&FieldType> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Ids of all registered vtag fields.
    pub fn vtag_field_ids(&self) -> BTreeSet<SchemaId> {
        self.by_id
            .values()
            .filter(|ft| ft.is_vtag)
            .map(|ft| ft.id)
            .collect()
    }

    /// Best-effort display name for a vtag or field id.
    pub fn safe_name(&self, id: &SchemaId) -> String {
        self.by_id
            .get(id)
            .map(|ft| ft.name.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

/// Point reads of record state. Implementations must be safe to call
/// from many workers at once.
pub trait RecordStore: Send + Sync {
    /// The record's current state: non-versioned fields plus the
    /// fields of its newest version. `None` if the record does not
    /// exist (a normal condition: it may have vanished between event
    /// emission and processing).
    fn read(&self, id: &AbsoluteRecordId) -> Result<Option<Record>>;

    /// The record's state as of a specific version. `None` if the
    /// record or the version does not exist.
    fn read_version(&self, id: &AbsoluteRecordId, version: u64) -> Result<Option<Record>>;
}

/// Supplies the best-effort "immediately before" and "immediately
/// after" record states used to evaluate inclusion rules around an
/// update event.
pub trait FilterStateProvider: Send + Sync {
    /// `(old, new)`: either side is `None` when the record did not
    /// exist on that side of the event.
    fn old_and_new(
        &self,
        id: &AbsoluteRecordId,
        event: &RecordEvent,
    ) -> Result<(Option<Record>, Option<Record>)>;
}
