//! Dependency map port.
//!
//! An edge `(source) -> (dependant, fields, vtag)` exists if and only
//! if building the current index entry for `dependant` under `vtag`
//! read `fields` from `source`. Edges for a `(dependant, vtag)` pair
//! are rewritten wholesale every time that index entry is rebuilt, so
//! stale edges never accumulate.

use std::collections::BTreeSet;

use recidx_model::{AbsoluteRecordId, SchemaId};

use crate::Result;

/// One dependency edge as written by the indexer: while building the
/// index entry of some dependant record, `fields` were read from
/// `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEntry {
    pub source: AbsoluteRecordId,
    pub fields: BTreeSet<SchemaId>,
}

impl DependencyEntry {
    pub fn new(source: AbsoluteRecordId, fields: BTreeSet<SchemaId>) -> Self {
        Self { source, fields }
    }
}

/// Forward-only, single-pass cursor over dependant record ids.
///
/// Not restartable. Callers must call `close` even on early
/// termination or error to release the underlying resource.
/// `has_next`/`next` on one cursor are serialized internally;
/// different cursors may be used concurrently without restriction.
pub trait DependantCursor: Send {
    fn has_next(&mut self) -> Result<bool>;

    /// The next dependant id, or `None` when exhausted.
    fn next(&mut self) -> Result<Option<AbsoluteRecordId>>;

    fn close(&mut self);
}

/// The dependency map: a persistent multimap keyed by source record.
pub trait DependencyMap: Send + Sync {
    /// Replace all edges recorded for `(dependant, vtag)` with the
    /// given entries. An empty slice clears the pair.
    fn replace_dependencies(
        &self,
        dependant: &AbsoluteRecordId,
        vtag: SchemaId,
        entries: &[DependencyEntry],
    ) -> Result<()>;

    /// Remove every edge recorded for the dependant, across all vtags.
    fn delete_dependencies(&self, dependant: &AbsoluteRecordId) -> Result<()>;

    /// Remove the edges recorded for one `(dependant, vtag)` pair.
    fn delete_dependencies_for_vtag(
        &self,
        dependant: &AbsoluteRecordId,
        vtag: SchemaId,
    ) -> Result<()>;

    /// All records with at least one edge pointing at `source`,
    /// regardless of vtag or fields.
    fn find_dependants(&self, source: &AbsoluteRecordId) -> Result<Box<dyn DependantCursor>>;

    /// Dependants whose recorded edge for `vtag` intersects `fields`.
    fn find_dependants_of(
        &self,
        source: &AbsoluteRecordId,
        fields: &BTreeSet<SchemaId>,
        vtag: SchemaId,
    ) -> Result<Box<dyn DependantCursor>>;
}

/// Drain a cursor into a vector, closing it afterwards. Test and
/// debug helper; production code iterates lazily.
pub fn collect_dependants(mut cursor: Box<dyn DependantCursor>) -> Result<Vec<AbsoluteRecordId>> {
    let mut out = Vec::new();
    let result = (|| {
        while cursor.has_next()? {
            if let Some(id) = cursor.next()? {
                out.push(id);
            }
        }
        Ok(())
    })();
    cursor.close();
    result.map(|()| out)
}
