//! Resolved configuration model.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use recidx_model::{IndexCase, Record, SchemaId, Scope};

use crate::features::deref::Follow;
use crate::features::repository::VTaggedRecord;

#[derive(Debug, Error)]
pub enum ConfError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown field '{0}' in configuration")]
    UnknownField(String),

    #[error("'{0}' is not a vtag field")]
    NotAVtag(String),

    #[error("'{0}' is a reserved vtag name and cannot be declared as a stored field")]
    ReservedVtagName(String),

    #[error("index field '{0}' defined twice")]
    DuplicateIndexField(String),
}

/// One ordered inclusion rule: records matching it are maintained
/// under the listed vtags. An empty vtag list means "track this
/// record as a denormalization source, do not index it directly".
#[derive(Debug, Clone)]
pub struct CaseRule {
    pub table: Option<String>,
    pub record_types: BTreeSet<String>,
    /// Variant properties the record id must carry (key -> required
    /// value, `*` for "any value").
    pub variant_props: BTreeMap<String, String>,
    pub version_tags: BTreeSet<SchemaId>,
}

impl CaseRule {
    fn matches(&self, table: &str, record: &Record) -> bool {
        if let Some(t) = &self.table {
            if t != table {
                return false;
            }
        }
        if !self.record_types.is_empty() && !self.record_types.contains(record.record_type()) {
            return false;
        }
        for (key, want) in &self.variant_props {
            match record.id().variant_props().get(key) {
                Some(have) if want == "*" || want == have => {}
                _ => return false,
            }
        }
        true
    }
}

/// One index document field: a chain of follows ending in a field
/// read. No follows means the field is read from the record itself.
#[derive(Debug, Clone)]
pub struct IndexField {
    pub name: String,
    pub follows: Vec<Follow>,
    pub field: SchemaId,
}

/// The resolved indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConf {
    cases: Vec<CaseRule>,
    fields: Vec<IndexField>,
    vtags: BTreeSet<SchemaId>,
    /// Fields whose change affects this index, per scope: directly
    /// indexed local fields plus the link fields deref chains start
    /// from.
    affecting_fields: BTreeMap<Scope, BTreeSet<SchemaId>>,
}

impl IndexerConf {
    pub(super) fn new(
        cases: Vec<CaseRule>,
        fields: Vec<IndexField>,
        affecting_fields: BTreeMap<Scope, BTreeSet<SchemaId>>,
    ) -> Self {
        let vtags = cases
            .iter()
            .flat_map(|c| c.version_tags.iter().copied())
            .collect();
        Self {
            cases,
            fields,
            vtags,
            affecting_fields,
        }
    }

    /// The applicable index case for a record's current type and
    /// state: first matching rule wins. `None` means the record is
    /// not part of this index at all.
    pub fn index_case(&self, table: &str, record: &Record) -> Option<IndexCase> {
        self.cases
            .iter()
            .find(|rule| rule.matches(table, record))
            .map(|rule| IndexCase::new(rule.version_tags.clone()))
    }

    /// All vtags any case of this configuration maintains.
    pub fn vtags(&self) -> &BTreeSet<SchemaId> {
        &self.vtags
    }

    pub fn index_fields(&self) -> &[IndexField] {
        &self.fields
    }

    pub fn has_deref_expressions(&self) -> bool {
        self.fields.iter().any(|f| !f.follows.is_empty())
    }

    /// Whether the changes carried by the snapshot's event, in the
    /// given scope, touch any field this index is derived from.
    pub fn changes_affect_index(&self, vt_record: &VTaggedRecord, scope: Scope) -> bool {
        let Some(event) = vt_record.event() else {
            return false;
        };
        let Some(updated) = event.updated_fields(scope) else {
            return false;
        };
        match self.affecting_fields.get(&scope) {
            Some(affecting) => updated.iter().any(|f| affecting.contains(f)),
            None => false,
        }
    }
}
