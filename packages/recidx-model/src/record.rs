//! Record field state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record_id::RecordId;
use crate::schema::SchemaId;

/// A field value as read from the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    String(String),
    Long(i64),
    /// A link to another record in the same table.
    Link(RecordId),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            FieldValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&RecordId> {
        match self {
            FieldValue::Link(id) => Some(id),
            _ => None,
        }
    }

    /// Textual rendering used when the value lands in an index document.
    pub fn to_index_text(&self) -> String {
        match self {
            FieldValue::String(s) => s.clone(),
            FieldValue::Long(v) => v.to_string(),
            FieldValue::Link(id) => id.to_string(),
        }
    }
}

/// One record's field state as visible at a specific version: the
/// non-versioned fields plus the versioned fields of that version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    record_type: String,
    /// The version this state was read at; `None` for a record that
    /// has no versions yet (only non-versioned state).
    version: Option<u64>,
    fields: BTreeMap<SchemaId, FieldValue>,
}

impl Record {
    pub fn new(id: RecordId, record_type: impl Into<String>) -> Self {
        Self {
            id,
            record_type: record_type.into(),
            version: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_field(mut self, id: SchemaId, value: FieldValue) -> Self {
        self.fields.insert(id, value);
        self
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn field(&self, id: &SchemaId) -> Option<&FieldValue> {
        self.fields.get(id)
    }

    pub fn has_field(&self, id: &SchemaId) -> bool {
        self.fields.contains_key(id)
    }

    pub fn fields(&self) -> &BTreeMap<SchemaId, FieldValue> {
        &self.fields
    }

    pub fn set_field(&mut self, id: SchemaId, value: FieldValue) {
        self.fields.insert(id, value);
    }

    pub fn delete_field(&mut self, id: &SchemaId) -> Option<FieldValue> {
        self.fields.remove(id)
    }
}
