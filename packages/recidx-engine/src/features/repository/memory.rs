//! In-memory record store.
//!
//! Backs tests and local wiring. Mutations return the `RecordEvent`
//! a real record store would emit onto the change log, so test
//! scenarios drive the engine exactly the way production events do.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use recidx_model::{
    AbsoluteRecordId, FieldValue, Record, RecordEvent, RecordEventType, RecordId, SchemaId, Scope,
};

use crate::features::repository::{FieldTypes, FilterStateProvider, RecordStore};
use crate::Result;

#[derive(Debug, Clone, Default)]
struct StoredRecord {
    record_type: String,
    non_versioned: BTreeMap<SchemaId, FieldValue>,
    /// Version n is `versions[n - 1]`.
    versions: Vec<BTreeMap<SchemaId, FieldValue>>,
}

impl StoredRecord {
    fn latest_version(&self) -> Option<u64> {
        if self.versions.is_empty() {
            None
        } else {
            Some(self.versions.len() as u64)
        }
    }

    fn as_record(&self, id: &RecordId, version: Option<u64>) -> Option<Record> {
        let mut record = Record::new(id.clone(), self.record_type.clone());
        if let Some(v) = version {
            let versioned = self.versions.get((v as usize).checked_sub(1)?)?;
            record = record.with_version(v);
            for (fid, value) in versioned {
                record.set_field(*fid, value.clone());
            }
        }
        for (fid, value) in &self.non_versioned {
            record.set_field(*fid, value.clone());
        }
        Some(record)
    }
}

#[derive(Debug, Default)]
struct Entry {
    live: Option<StoredRecord>,
    /// State before the most recent mutation; feeds the best-effort
    /// old-state side of filter evaluation.
    previous: Option<StoredRecord>,
}

/// In-memory `RecordStore` + `FilterStateProvider`.
pub struct InMemoryRecordStore {
    field_types: Arc<FieldTypes>,
    tables: RwLock<HashMap<String, HashMap<RecordId, Entry>>>,
}

impl InMemoryRecordStore {
    pub fn new(field_types: Arc<FieldTypes>) -> Self {
        Self {
            field_types,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn field_types(&self) -> &Arc<FieldTypes> {
        &self.field_types
    }

    fn scope_of(&self, field: &SchemaId) -> Scope {
        self.field_types
            .by_id(field)
            .map(|ft| ft.scope)
            .unwrap_or(Scope::NonVersioned)
    }

    fn is_vtag(&self, field: &SchemaId) -> bool {
        self.field_types
            .by_id(field)
            .map(|ft| ft.is_vtag)
            .unwrap_or(false)
    }

    /// Create a record. Versioned fields land in version 1.
    pub fn create(
        &self,
        id: &AbsoluteRecordId,
        record_type: &str,
        fields: BTreeMap<SchemaId, FieldValue>,
    ) -> RecordEvent {
        let mut stored = StoredRecord {
            record_type: record_type.to_string(),
            ..StoredRecord::default()
        };
        let mut event = RecordEvent::new(RecordEventType::Create, id.table());
        let mut versioned = BTreeMap::new();

        for (field, value) in fields {
            let scope = self.scope_of(&field);
            event = event.with_updated_field(scope, field);
            if self.is_vtag(&field) {
                event = event.with_modified_vtag(field);
            }
            match scope {
                Scope::NonVersioned => {
                    stored.non_versioned.insert(field, value);
                }
                Scope::Versioned | Scope::VersionedMutable => {
                    versioned.insert(field, value);
                }
            }
        }

        if !versioned.is_empty() {
            stored.versions.push(versioned);
            event = event.with_version_created(1);
        }

        let mut tables = self.tables.write();
        let entry = tables
            .entry(id.table().to_string())
            .or_default()
            .entry(id.record_id().clone())
            .or_default();
        entry.previous = entry.live.take();
        entry.live = Some(stored);

        event
    }

    /// Update field values. Versioned fields go into a new version
    /// when `new_version` is set, otherwise they mutate the newest
    /// version in place (versioned-mutable semantics).
    pub fn update(
        &self,
        id: &AbsoluteRecordId,
        fields: BTreeMap<SchemaId, FieldValue>,
        new_version: bool,
    ) -> Option<RecordEvent> {
        let mut tables = self.tables.write();
        let entry = tables.get_mut(id.table())?.get_mut(id.record_id())?;
        let current = entry.live.as_ref()?;

        let snapshot = current.clone();
        let mut next = current.clone();
        let mut event = RecordEvent::new(RecordEventType::Update, id.table());

        let mut versioned_changed = false;
        if new_version {
            let base = next.versions.last().cloned().unwrap_or_default();
            next.versions.push(base);
        }

        for (field, value) in fields {
            let scope = self.scope_of(&field);
            let slot = match scope {
                Scope::NonVersioned => &mut next.non_versioned,
                Scope::Versioned | Scope::VersionedMutable => {
                    versioned_changed = true;
                    if next.versions.is_empty() {
                        next.versions.push(BTreeMap::new());
                    }
                    let last = next.versions.len() - 1;
                    &mut next.versions[last]
                }
            };
            if slot.get(&field) != Some(&value) {
                event = event.with_updated_field(scope, field);
                if self.is_vtag(&field) {
                    event = event.with_modified_vtag(field);
                }
            }
            slot.insert(field, value);
        }

        if versioned_changed {
            let version = next.versions.len() as u64;
            event = if new_version {
                event.with_version_created(version)
            } else {
                event.with_version_updated(version)
            };
        }

        entry.previous = Some(snapshot);
        entry.live = Some(next);
        Some(event)
    }

    /// Change the record type; the event carries the
    /// record-type-changed flag.
    pub fn change_record_type(&self, id: &AbsoluteRecordId, record_type: &str) -> Option<RecordEvent> {
        let mut tables = self.tables.write();
        let entry = tables.get_mut(id.table())?.get_mut(id.record_id())?;
        let current = entry.live.as_mut()?;
        entry.previous = Some(current.clone());
        current.record_type = record_type.to_string();
        Some(RecordEvent::new(RecordEventType::Update, id.table()).with_record_type_changed())
    }

    /// Remove a field. For a vtag field this is how a tag disappears
    /// from a record.
    pub fn delete_field(&self, id: &AbsoluteRecordId, field: SchemaId) -> Option<RecordEvent> {
        let mut tables = self.tables.write();
        let entry = tables.get_mut(id.table())?.get_mut(id.record_id())?;
        let current = entry.live.as_mut()?;
        entry.previous = Some(current.clone());
        current.non_versioned.remove(&field)?;

        let mut event = RecordEvent::new(RecordEventType::Update, id.table())
            .with_updated_field(Scope::NonVersioned, field);
        if self.is_vtag(&field) {
            event = event.with_modified_vtag(field);
        }
        Some(event)
    }

    pub fn delete(&self, id: &AbsoluteRecordId) -> Option<RecordEvent> {
        let mut tables = self.tables.write();
        let entry = tables.get_mut(id.table())?.get_mut(id.record_id())?;
        entry.previous = entry.live.take();
        entry.previous.as_ref()?;
        Some(RecordEvent::new(RecordEventType::Delete, id.table()))
    }

    fn with_entry<T>(
        &self,
        id: &AbsoluteRecordId,
        f: impl FnOnce(&Entry) -> Option<T>,
    ) -> Option<T> {
        let tables = self.tables.read();
        tables.get(id.table())?.get(id.record_id()).and_then(f)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn read(&self, id: &AbsoluteRecordId) -> Result<Option<Record>> {
        Ok(self.with_entry(id, |entry| {
            let stored = entry.live.as_ref()?;
            stored.as_record(id.record_id(), stored.latest_version())
        }))
    }

    fn read_version(&self, id: &AbsoluteRecordId, version: u64) -> Result<Option<Record>> {
        Ok(self.with_entry(id, |entry| {
            let stored = entry.live.as_ref()?;
            if version == 0 {
                // Version 0 addresses the non-versioned state only.
                stored.as_record(id.record_id(), None)
            } else {
                stored.as_record(id.record_id(), Some(version))
            }
        }))
    }
}

impl FilterStateProvider for InMemoryRecordStore {
    fn old_and_new(
        &self,
        id: &AbsoluteRecordId,
        _event: &RecordEvent,
    ) -> Result<(Option<Record>, Option<Record>)> {
        Ok(self
            .with_entry(id, |entry| {
                let old = entry
                    .previous
                    .as_ref()
                    .and_then(|s| s.as_record(id.record_id(), s.latest_version()));
                let new = entry
                    .live
                    .as_ref()
                    .and_then(|s| s.as_record(id.record_id(), s.latest_version()));
                Some((old, new))
            })
            .unwrap_or((None, None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recidx_model::FieldType;

    fn field_types() -> Arc<FieldTypes> {
        Arc::new(
            FieldTypes::new()
                .with(FieldType::new("name", Scope::NonVersioned))
                .with(FieldType::new("body", Scope::Versioned))
                .with(FieldType::vtag("live")),
        )
    }

    fn abs(id: &str) -> AbsoluteRecordId {
        AbsoluteRecordId::new("records", RecordId::master(id))
    }

    #[test]
    fn create_then_read_round_trips_state() {
        let store = InMemoryRecordStore::new(field_types());
        let name = SchemaId::from_name("name");
        let body = SchemaId::from_name("body");

        let event = store.create(
            &abs("r1"),
            "Doc",
            BTreeMap::from([
                (name, FieldValue::String("apple".into())),
                (body, FieldValue::String("text".into())),
            ]),
        );
        assert_eq!(event.event_type(), RecordEventType::Create);
        assert_eq!(event.version_created(), Some(1));

        let record = store.read(&abs("r1")).unwrap().unwrap();
        assert_eq!(record.field(&name).unwrap().as_str(), Some("apple"));
        assert_eq!(record.version(), Some(1));
    }

    #[test]
    fn update_reports_only_changed_fields() {
        let store = InMemoryRecordStore::new(field_types());
        let name = SchemaId::from_name("name");

        store.create(
            &abs("r1"),
            "Doc",
            BTreeMap::from([(name, FieldValue::String("apple".into()))]),
        );
        let event = store
            .update(
                &abs("r1"),
                BTreeMap::from([(name, FieldValue::String("apple".into()))]),
                false,
            )
            .unwrap();
        assert!(event.updated_fields(Scope::NonVersioned).is_none());

        let event = store
            .update(
                &abs("r1"),
                BTreeMap::from([(name, FieldValue::String("pear".into()))]),
                false,
            )
            .unwrap();
        assert!(event
            .updated_fields(Scope::NonVersioned)
            .unwrap()
            .contains(&name));
    }

    #[test]
    fn vtag_updates_are_flagged_as_modified_vtags() {
        let store = InMemoryRecordStore::new(field_types());
        let live = SchemaId::from_name("live");

        store.create(&abs("r1"), "Doc", BTreeMap::new());
        let event = store
            .update(&abs("r1"), BTreeMap::from([(live, FieldValue::Long(1))]), false)
            .unwrap();
        assert!(event.modified_vtags().contains(&live));
    }

    #[test]
    fn old_and_new_expose_the_last_mutation() {
        let store = InMemoryRecordStore::new(field_types());
        let name = SchemaId::from_name("name");

        let create = store.create(
            &abs("r1"),
            "Doc",
            BTreeMap::from([(name, FieldValue::String("apple".into()))]),
        );
        let (old, new) = store.old_and_new(&abs("r1"), &create).unwrap();
        assert!(old.is_none());
        assert!(new.is_some());

        let update = store
            .update(
                &abs("r1"),
                BTreeMap::from([(name, FieldValue::String("pear".into()))]),
                false,
            )
            .unwrap();
        let (old, new) = store.old_and_new(&abs("r1"), &update).unwrap();
        assert_eq!(old.unwrap().field(&name).unwrap().as_str(), Some("apple"));
        assert_eq!(new.unwrap().field(&name).unwrap().as_str(), Some("pear"));

        let delete = store.delete(&abs("r1")).unwrap();
        let (old, new) = store.old_and_new(&abs("r1"), &delete).unwrap();
        assert!(old.is_some());
        assert!(new.is_none());
        assert!(store.read(&abs("r1")).unwrap().is_none());
    }
}
