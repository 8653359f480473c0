//! Change-log events.
//!
//! A `RecordEvent` is the payload of one change-log entry; the entry
//! key is the raw record id bytes. Events are immutable once built
//! and encode to a compact MessagePack payload that round-trips
//! byte-exact (all collections are ordered).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{SchemaId, Scope};

#[derive(Debug, Error)]
pub enum EventCodecError {
    #[error("failed to decode record event: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("failed to encode record event: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordEventType {
    Create,
    Update,
    Delete,
    /// Self-generated re-index request carrying an explicit vtag set.
    Index,
}

/// Routing hints attached to self-generated events so that only the
/// emitting subscription processes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFilterData {
    pub subscription_inclusions: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEvent {
    event_type: RecordEventType,
    table_name: String,
    /// Updated field ids, tagged by the scope they belong to.
    updated_fields: BTreeMap<Scope, BTreeSet<SchemaId>>,
    version_created: Option<u64>,
    version_updated: Option<u64>,
    /// Only meaningful for `Index` events.
    vtags_to_index: BTreeSet<SchemaId>,
    /// Vtag fields whose value changed in this mutation.
    modified_vtags: BTreeSet<SchemaId>,
    record_type_changed: bool,
    filter_data: Option<IndexFilterData>,
}

impl RecordEvent {
    pub fn new(event_type: RecordEventType, table_name: impl Into<String>) -> Self {
        Self {
            event_type,
            table_name: table_name.into(),
            updated_fields: BTreeMap::new(),
            version_created: None,
            version_updated: None,
            vtags_to_index: BTreeSet::new(),
            modified_vtags: BTreeSet::new(),
            record_type_changed: false,
            filter_data: None,
        }
    }

    pub fn with_updated_field(mut self, scope: Scope, field: SchemaId) -> Self {
        self.updated_fields.entry(scope).or_default().insert(field);
        self
    }

    pub fn with_version_created(mut self, version: u64) -> Self {
        self.version_created = Some(version);
        self
    }

    pub fn with_version_updated(mut self, version: u64) -> Self {
        self.version_updated = Some(version);
        self
    }

    pub fn with_vtag_to_index(mut self, vtag: SchemaId) -> Self {
        self.vtags_to_index.insert(vtag);
        self
    }

    pub fn with_modified_vtag(mut self, vtag: SchemaId) -> Self {
        self.modified_vtags.insert(vtag);
        self
    }

    pub fn with_record_type_changed(mut self) -> Self {
        self.record_type_changed = true;
        self
    }

    pub fn with_filter_data(mut self, filter_data: IndexFilterData) -> Self {
        self.filter_data = Some(filter_data);
        self
    }

    pub fn event_type(&self) -> RecordEventType {
        self.event_type
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn updated_fields(&self, scope: Scope) -> Option<&BTreeSet<SchemaId>> {
        self.updated_fields.get(&scope)
    }

    /// All updated field ids regardless of scope.
    pub fn all_updated_fields(&self) -> BTreeSet<SchemaId> {
        self.updated_fields.values().flatten().copied().collect()
    }

    pub fn updated_fields_by_scope(&self) -> &BTreeMap<Scope, BTreeSet<SchemaId>> {
        &self.updated_fields
    }

    pub fn version_created(&self) -> Option<u64> {
        self.version_created
    }

    pub fn version_updated(&self) -> Option<u64> {
        self.version_updated
    }

    pub fn vtags_to_index(&self) -> &BTreeSet<SchemaId> {
        &self.vtags_to_index
    }

    pub fn modified_vtags(&self) -> &BTreeSet<SchemaId> {
        &self.modified_vtags
    }

    pub fn record_type_changed(&self) -> bool {
        self.record_type_changed
    }

    pub fn filter_data(&self) -> Option<&IndexFilterData> {
        self.filter_data.as_ref()
    }

    /// Whether this event should be processed by the given
    /// subscription. Events without filter data go to everyone.
    pub fn applies_to_subscription(&self, subscription_id: &str) -> bool {
        match &self.filter_data {
            Some(data) if !data.subscription_inclusions.is_empty() => {
                data.subscription_inclusions.contains(subscription_id)
            }
            _ => true,
        }
    }

    /// Encode to the compact change-log payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventCodecError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventCodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
