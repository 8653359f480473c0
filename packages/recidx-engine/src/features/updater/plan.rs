//! The update plan reducer.
//!
//! Each sub-rule of the UPDATE branch contributes a delta (index
//! these vtags, delete those) instead of mutating a shared set; the
//! deltas combine associatively, so the outcome does not depend on
//! hidden evaluation order. Deletes are applied before adds, so a
//! vtag appearing on both sides ends up rebuilt, not removed.

use std::collections::BTreeSet;

use recidx_model::SchemaId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatePlan {
    index: BTreeSet<SchemaId>,
    delete_vtags: BTreeSet<SchemaId>,
    delete_record: bool,
}

impl UpdatePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_vtag(mut self, vtag: SchemaId) -> Self {
        self.index.insert(vtag);
        self
    }

    pub fn index_vtags(mut self, vtags: impl IntoIterator<Item = SchemaId>) -> Self {
        self.index.extend(vtags);
        self
    }

    pub fn delete_vtag(mut self, vtag: SchemaId) -> Self {
        self.delete_vtags.insert(vtag);
        self
    }

    /// Wipe every entry of the record. Subsumes any single-vtag
    /// deletes merged in before or after.
    pub fn delete_record(mut self) -> Self {
        self.delete_record = true;
        self
    }

    pub fn merge(mut self, other: UpdatePlan) -> Self {
        self.index.extend(other.index);
        self.delete_vtags.extend(other.delete_vtags);
        self.delete_record |= other.delete_record;
        self
    }

    pub fn vtags_to_index(&self) -> &BTreeSet<SchemaId> {
        &self.index
    }

    /// Single-vtag deletes still worth applying: entries not for
    /// re-indexing and not covered by a record-level delete.
    pub fn vtags_to_delete(&self) -> BTreeSet<SchemaId> {
        if self.delete_record {
            return BTreeSet::new();
        }
        self.delete_vtags.difference(&self.index).copied().collect()
    }

    pub fn deletes_record(&self) -> bool {
        self.delete_record
    }

    pub fn is_empty(&self) -> bool {
        !self.delete_record && self.index.is_empty() && self.delete_vtags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str) -> SchemaId {
        SchemaId::from_name(name)
    }

    #[test]
    fn merge_is_order_independent() {
        let a = UpdatePlan::new().index_vtag(tag("live")).delete_vtag(tag("old"));
        let b = UpdatePlan::new().index_vtag(tag("preview"));
        assert_eq!(a.clone().merge(b.clone()), b.merge(a));
    }

    #[test]
    fn reindex_wins_over_single_delete() {
        let plan = UpdatePlan::new().delete_vtag(tag("live")).index_vtag(tag("live"));
        assert!(plan.vtags_to_delete().is_empty());
        assert!(plan.vtags_to_index().contains(&tag("live")));
    }

    #[test]
    fn record_delete_subsumes_vtag_deletes() {
        let plan = UpdatePlan::new().delete_vtag(tag("live")).delete_record();
        assert!(plan.deletes_record());
        assert!(plan.vtags_to_delete().is_empty());
    }
}
