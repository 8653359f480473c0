//! The Indexer: turns a record snapshot plus a set of vtags into
//! index documents and applies add/delete operations against the
//! correct shard, rewriting dependency edges as a side effect.

mod docbuilder;
mod tantivy_backend;

pub use docbuilder::{build_document, document_key, BuiltDocument, IndexDocument};
pub use tantivy_backend::{ShardWriter, TantivyShardManager};

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use recidx_model::{AbsoluteRecordId, RecordId, SchemaId};
use recidx_storage::{DependencyEntry, DependencyMap};

use crate::features::conf::IndexerConf;
use crate::features::deref::DerefContext;
use crate::features::repository::{FieldTypes, RecordStore, VTaggedRecord};
use crate::features::sharding::ShardSelector;
use crate::metrics::IndexerMetrics;
use crate::Result;

pub struct Indexer {
    conf: Arc<IndexerConf>,
    store: Arc<dyn RecordStore>,
    field_types: Arc<FieldTypes>,
    selector: ShardSelector,
    writer: Arc<dyn ShardWriter>,
    /// `None` when dependency tracking is disabled for this index.
    deref_map: Option<Arc<dyn DependencyMap>>,
    metrics: IndexerMetrics,
}

impl Indexer {
    pub fn new(
        index_name: &str,
        conf: Arc<IndexerConf>,
        store: Arc<dyn RecordStore>,
        field_types: Arc<FieldTypes>,
        selector: ShardSelector,
        writer: Arc<dyn ShardWriter>,
        deref_map: Option<Arc<dyn DependencyMap>>,
    ) -> Self {
        Self {
            conf,
            store,
            field_types,
            selector,
            writer,
            deref_map,
            metrics: IndexerMetrics::new(index_name),
        }
    }

    pub fn conf(&self) -> &IndexerConf {
        &self.conf
    }

    /// Index the record under each requested vtag that is actually
    /// present on it. Re-running with the same record state is
    /// idempotent: documents replace their predecessor, and the
    /// dependency edges for each `(record, vtag)` pair are rewritten
    /// wholesale.
    pub fn index(
        &self,
        table: &str,
        vt_record: &VTaggedRecord,
        vtags: &BTreeSet<SchemaId>,
    ) -> Result<()> {
        for vtag in vtags {
            if !vt_record.vtags().contains_key(vtag) {
                continue;
            }
            let Some(record) = vt_record.record_at(self.store.as_ref(), vtag)? else {
                continue;
            };

            let ctx = DerefContext {
                store: self.store.as_ref(),
                field_types: &self.field_types,
                table,
                vtag: *vtag,
            };
            let built = build_document(&ctx, &self.conf, &record, *vtag)?;

            let shard = self.selector.select(record.id())?.to_string();
            debug!(record = %built.document.key, %shard, "adding index document");
            self.writer.add(&shard, &built.document)?;
            self.metrics.adds.inc();

            if let Some(deref_map) = &self.deref_map {
                let dependant = AbsoluteRecordId::new(table, record.id().clone());
                let entries: Vec<DependencyEntry> = built
                    .dependencies
                    .into_iter()
                    .map(|(source, fields)| DependencyEntry::new(source, fields))
                    .collect();
                deref_map.replace_dependencies(&dependant, *vtag, &entries)?;
            }
        }
        Ok(())
    }

    /// Remove every index entry for the record, across all vtags and
    /// all shards it could reside on, and clear its dependency edges.
    pub fn delete_record(&self, table: &str, id: &RecordId) -> Result<()> {
        for shard in self.selector.shards() {
            self.writer.delete_record(&shard, table, id)?;
        }
        self.metrics.deletes.inc();
        if let Some(deref_map) = &self.deref_map {
            deref_map.delete_dependencies(&AbsoluteRecordId::new(table, id.clone()))?;
        }
        Ok(())
    }

    /// Remove the single index entry for `(record, vtag)`, with its
    /// dependency edges.
    pub fn delete_vtag_entry(&self, table: &str, id: &RecordId, vtag: SchemaId) -> Result<()> {
        for shard in self.selector.shards() {
            self.writer.delete_entry(&shard, &document_key(table, id, &vtag))?;
        }
        self.metrics.deletes.inc();
        if let Some(deref_map) = &self.deref_map {
            deref_map
                .delete_dependencies_for_vtag(&AbsoluteRecordId::new(table, id.clone()), vtag)?;
        }
        Ok(())
    }
}
