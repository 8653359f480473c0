//! Per-event record snapshot with resolved vtags.

use std::collections::{BTreeMap, BTreeSet};

use recidx_model::{last_vtag_id, AbsoluteRecordId, Record, RecordEvent, SchemaId};

use crate::features::repository::{FieldTypes, RecordStore};
use crate::Result;

/// An immutable snapshot combining a record's field state with its
/// vtag resolution, built once per processed event and used
/// consistently throughout that event's handling. Later concurrent
/// writes to the record surface only in subsequent events, never in
/// the in-flight computation.
#[derive(Debug, Clone)]
pub struct VTaggedRecord {
    id: AbsoluteRecordId,
    record: Record,
    /// vtag id -> version it points at; always contains the built-in
    /// `last` tag when the record has at least one version.
    vtags: BTreeMap<SchemaId, u64>,
    vtags_by_version: BTreeMap<u64, BTreeSet<SchemaId>>,
    event: Option<RecordEvent>,
}

impl VTaggedRecord {
    /// Read the record and resolve its vtags. `Ok(None)` when the
    /// record does not exist (anymore).
    pub fn read(
        store: &dyn RecordStore,
        field_types: &FieldTypes,
        id: &AbsoluteRecordId,
        event: Option<RecordEvent>,
    ) -> Result<Option<Self>> {
        let record = match store.read(id)? {
            Some(record) => record,
            None => return Ok(None),
        };

        // Version 0 is a valid target: it addresses the record's
        // non-versioned state.
        let mut vtags: BTreeMap<SchemaId, u64> = BTreeMap::new();
        for vtag_id in field_types.vtag_field_ids() {
            if let Some(version) = record.field(&vtag_id).and_then(|v| v.as_long()) {
                if version >= 0 {
                    vtags.insert(vtag_id, version as u64);
                }
            }
        }
        if let Some(latest) = record.version() {
            vtags.insert(last_vtag_id(), latest);
        }

        let mut vtags_by_version: BTreeMap<u64, BTreeSet<SchemaId>> = BTreeMap::new();
        for (vtag, version) in &vtags {
            vtags_by_version.entry(*version).or_default().insert(*vtag);
        }

        Ok(Some(Self {
            id: id.clone(),
            record,
            vtags,
            vtags_by_version,
            event,
        }))
    }

    pub fn id(&self) -> &AbsoluteRecordId {
        &self.id
    }

    /// The record's current state (newest version + non-versioned).
    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn vtags(&self) -> &BTreeMap<SchemaId, u64> {
        &self.vtags
    }

    pub fn vtags_by_version(&self) -> &BTreeMap<u64, BTreeSet<SchemaId>> {
        &self.vtags_by_version
    }

    pub fn event(&self) -> Option<&RecordEvent> {
        self.event.as_ref()
    }

    /// The record's state as seen under the given vtag.
    pub fn record_at(&self, store: &dyn RecordStore, vtag: &SchemaId) -> Result<Option<Record>> {
        let version = match self.vtags.get(vtag) {
            Some(v) => *v,
            None => return Ok(None),
        };
        store.read_version(&self.id, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::repository::InMemoryRecordStore;
    use recidx_model::{FieldType, FieldValue, RecordId, Scope};
    use std::sync::Arc;

    #[test]
    fn vtags_resolve_including_builtin_last() {
        let field_types = Arc::new(
            FieldTypes::new()
                .with(FieldType::new("body", Scope::Versioned))
                .with(FieldType::vtag("live")),
        );
        let store = InMemoryRecordStore::new(Arc::clone(&field_types));
        let id = AbsoluteRecordId::new("records", RecordId::master("r1"));
        let body = SchemaId::from_name("body");
        let live = SchemaId::from_name("live");

        store.create(
            &id,
            "Doc",
            BTreeMap::from([(body, FieldValue::String("v1".into()))]),
        );
        store.update(&id, BTreeMap::from([(body, FieldValue::String("v2".into()))]), true);
        store.update(&id, BTreeMap::from([(live, FieldValue::Long(1))]), false);

        let vt = VTaggedRecord::read(&store, &field_types, &id, None)
            .unwrap()
            .unwrap();
        assert_eq!(vt.vtags().get(&live), Some(&1));
        assert_eq!(vt.vtags().get(&last_vtag_id()), Some(&2));
        assert_eq!(
            vt.vtags_by_version().get(&1),
            Some(&BTreeSet::from([live]))
        );

        let live_state = vt.record_at(&store, &live).unwrap().unwrap();
        assert_eq!(live_state.field(&body).unwrap().as_str(), Some("v1"));
        let last_state = vt.record_at(&store, &last_vtag_id()).unwrap().unwrap();
        assert_eq!(last_state.field(&body).unwrap().as_str(), Some("v2"));
    }

    #[test]
    fn missing_record_reads_as_none() {
        let field_types = Arc::new(FieldTypes::new());
        let store = InMemoryRecordStore::new(Arc::clone(&field_types));
        let id = AbsoluteRecordId::new("records", RecordId::master("ghost"));
        assert!(VTaggedRecord::read(&store, &field_types, &id, None)
            .unwrap()
            .is_none());
    }
}
