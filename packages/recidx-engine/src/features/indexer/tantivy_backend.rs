//! Tantivy-backed shard writer.
//!
//! One tantivy index per shard, each writer behind a mutex. Adds are
//! upserts: delete the document's key term, add the replacement,
//! commit.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, IndexWriter, TantivyDocument, Term};

use recidx_model::RecordId;

use crate::features::conf::IndexerConf;
use crate::features::indexer::IndexDocument;
use crate::{EngineError, Result};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Index mutations, addressed by shard name. The seam the Indexer
/// writes through; the tantivy implementation below is the only
/// production one.
pub trait ShardWriter: Send + Sync {
    /// Upsert: replaces any document with the same key.
    fn add(&self, shard: &str, doc: &IndexDocument) -> Result<()>;

    /// Remove every document of the record, across all its vtags.
    fn delete_record(&self, shard: &str, table: &str, id: &RecordId) -> Result<()>;

    /// Remove the single document with the given key.
    fn delete_entry(&self, shard: &str, key: &str) -> Result<()>;
}

struct ShardFields {
    key: Field,
    rid: Field,
    vtag: Field,
    content: BTreeMap<String, Field>,
}

struct Shard {
    index: Index,
    writer: Arc<Mutex<IndexWriter>>,
    fields: ShardFields,
}

/// All tantivy shards of one index, living under one root directory.
pub struct TantivyShardManager {
    shards: BTreeMap<String, Shard>,
}

impl TantivyShardManager {
    /// Opens (or creates) one tantivy index per shard name under
    /// `root`. The document schema is derived from the indexer
    /// configuration: identity terms plus one text field per
    /// configured index field.
    pub fn open<S: AsRef<str>>(
        root: &Path,
        shard_names: impl IntoIterator<Item = S>,
        conf: &IndexerConf,
    ) -> Result<Self> {
        let mut builder = Schema::builder();
        let key = builder.add_text_field("key", STRING | STORED);
        let rid = builder.add_text_field("rid", STRING | STORED);
        let vtag = builder.add_text_field("vtag", STRING | STORED);
        let mut content = BTreeMap::new();
        for field in conf.index_fields() {
            content.insert(
                field.name.clone(),
                builder.add_text_field(&field.name, TEXT | STORED),
            );
        }
        let schema = builder.build();

        let mut shards = BTreeMap::new();
        for name in shard_names {
            let name = name.as_ref();
            let dir = root.join(name);
            let index = if dir.exists() {
                Index::open_in_dir(&dir)?
            } else {
                std::fs::create_dir_all(&dir)?;
                Index::create_in_dir(&dir, schema.clone())?
            };
            let writer = index.writer(WRITER_HEAP_BYTES)?;
            shards.insert(
                name.to_string(),
                Shard {
                    index,
                    writer: Arc::new(Mutex::new(writer)),
                    fields: ShardFields {
                        key,
                        rid,
                        vtag,
                        content: content.clone(),
                    },
                },
            );
        }
        Ok(Self { shards })
    }

    fn shard(&self, name: &str) -> Result<&Shard> {
        self.shards
            .get(name)
            .ok_or_else(|| EngineError::search_backend(format!("unknown shard {name:?}")))
    }

    /// Keys of every document of the record, across all shards.
    pub fn keys_for_record(&self, table: &str, id: &RecordId) -> Result<Vec<String>> {
        let rid = record_term(table, id);
        let mut keys = Vec::new();
        for shard in self.shards.values() {
            let reader = shard.index.reader()?;
            let searcher = reader.searcher();
            let query = TermQuery::new(
                Term::from_field_text(shard.fields.rid, &rid),
                IndexRecordOption::Basic,
            );
            for (_score, address) in searcher.search(&query, &TopDocs::with_limit(1024))? {
                let doc: TantivyDocument = searcher.doc(address)?;
                if let Some(key) = doc.get_first(shard.fields.key).and_then(|v| v.as_str()) {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Full-text search over one configured field, across all shards.
    /// Returns the matching document keys.
    pub fn search_text(&self, field: &str, query: &str, limit: usize) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for shard in self.shards.values() {
            let Some(content_field) = shard.fields.content.get(field) else {
                return Err(EngineError::search_backend(format!(
                    "unknown index field {field:?}"
                )));
            };
            let reader = shard.index.reader()?;
            let searcher = reader.searcher();
            let parser = QueryParser::for_index(&shard.index, vec![*content_field]);
            let parsed = parser
                .parse_query(query)
                .map_err(|e| EngineError::search_backend(e.to_string()))?;
            for (_score, address) in searcher.search(&parsed, &TopDocs::with_limit(limit))? {
                let doc: TantivyDocument = searcher.doc(address)?;
                if let Some(key) = doc.get_first(shard.fields.key).and_then(|v| v.as_str()) {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub fn num_docs(&self) -> Result<u64> {
        let mut total = 0;
        for shard in self.shards.values() {
            let reader = shard.index.reader()?;
            total += reader.searcher().num_docs();
        }
        Ok(total)
    }
}

impl ShardWriter for TantivyShardManager {
    fn add(&self, shard: &str, doc: &IndexDocument) -> Result<()> {
        let shard = self.shard(shard)?;
        let mut document = TantivyDocument::new();
        document.add_text(shard.fields.key, &doc.key);
        document.add_text(shard.fields.rid, record_term(&doc.table, &doc.record_id));
        document.add_text(shard.fields.vtag, doc.vtag.to_string());
        for (name, value) in &doc.fields {
            // Fields not in the schema were added to the conf after
            // the shard was opened; that is a caller bug surfaced here.
            let field = shard.fields.content.get(name).ok_or_else(|| {
                EngineError::search_backend(format!("field {name:?} missing from shard schema"))
            })?;
            document.add_text(*field, value);
        }

        let mut writer = shard.writer.lock();
        writer.delete_term(Term::from_field_text(shard.fields.key, &doc.key));
        writer.add_document(document)?;
        writer.commit()?;
        Ok(())
    }

    fn delete_record(&self, shard: &str, table: &str, id: &RecordId) -> Result<()> {
        let shard = self.shard(shard)?;
        let mut writer = shard.writer.lock();
        writer.delete_term(Term::from_field_text(shard.fields.rid, &record_term(table, id)));
        writer.commit()?;
        Ok(())
    }

    fn delete_entry(&self, shard: &str, key: &str) -> Result<()> {
        let shard = self.shard(shard)?;
        let mut writer = shard.writer.lock();
        writer.delete_term(Term::from_field_text(shard.fields.key, key));
        writer.commit()?;
        Ok(())
    }
}

fn record_term(table: &str, id: &RecordId) -> String {
    format!("{table}|{id}")
}
