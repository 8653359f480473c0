//! Builds one index document from a record's state under a vtag.

use std::collections::{BTreeMap, BTreeSet};

use recidx_model::{AbsoluteRecordId, Record, RecordId, SchemaId};

use crate::features::conf::IndexerConf;
use crate::features::deref::{resolve_index_value, DerefContext};
use crate::Result;

/// A flat document ready for the search backend: the identity triple
/// plus the configured fields that resolved to a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDocument {
    /// Unique document key, `table|record id|vtag`. Upserts and
    /// single-entry deletes address documents by this term.
    pub key: String,
    pub table: String,
    pub record_id: RecordId,
    pub vtag: SchemaId,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct BuiltDocument {
    pub document: IndexDocument,
    /// Non-local records consulted while resolving deref chains, with
    /// the fields read from each.
    pub dependencies: BTreeMap<AbsoluteRecordId, BTreeSet<SchemaId>>,
}

pub fn document_key(table: &str, id: &RecordId, vtag: &SchemaId) -> String {
    format!("{table}|{id}|{vtag}")
}

/// Resolve every configured index field against `record` (its state
/// under `ctx.vtag`). Fields whose chain dead-ends are simply absent
/// from the document; the dependencies gathered up to the dead end
/// are still returned.
pub fn build_document(
    ctx: &DerefContext<'_>,
    conf: &IndexerConf,
    record: &Record,
    vtag: SchemaId,
) -> Result<BuiltDocument> {
    let mut fields = BTreeMap::new();
    let mut dependencies: BTreeMap<AbsoluteRecordId, BTreeSet<SchemaId>> = BTreeMap::new();

    for expr in conf.index_fields() {
        let resolution = resolve_index_value(ctx, record, expr)?;
        for (source, read) in resolution.dependencies {
            dependencies.entry(source).or_default().extend(read);
        }
        if let Some(value) = resolution.value {
            fields.insert(expr.name.clone(), value.to_index_text());
        }
    }

    Ok(BuiltDocument {
        document: IndexDocument {
            key: document_key(ctx.table, record.id(), &vtag),
            table: ctx.table.to_string(),
            record_id: record.id().clone(),
            vtag,
            fields,
        },
        dependencies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use recidx_model::{FieldType, FieldValue, Scope};

    use crate::features::conf::IndexerConfBuilder;
    use crate::features::repository::{FieldTypes, InMemoryRecordStore, RecordStore};
    use recidx_model::last_vtag_id;

    #[test]
    fn builds_direct_and_dereferenced_fields() {
        let types = Arc::new(
            FieldTypes::new()
                .with(FieldType::new("title", Scope::Versioned))
                .with(FieldType::new("author_link", Scope::NonVersioned))
                .with(FieldType::new("name", Scope::NonVersioned)),
        );
        let store = InMemoryRecordStore::new(Arc::clone(&types));
        let title = SchemaId::from_name("title");
        let author_link = SchemaId::from_name("author_link");
        let name = SchemaId::from_name("name");

        let author = AbsoluteRecordId::new("records", RecordId::master("author-1"));
        store.create(
            &author,
            "Author",
            BTreeMap::from([(name, FieldValue::String("A. Writer".into()))]),
        );
        let book = AbsoluteRecordId::new("records", RecordId::master("book-1"));
        store.create(
            &book,
            "Book",
            BTreeMap::from([
                (title, FieldValue::String("Fruit".into())),
                (author_link, FieldValue::Link(author.record_id().clone())),
            ]),
        );

        let conf = IndexerConfBuilder::build(
            br#"{
                "cases": [{"recordTypes": ["Book"], "vtags": ["last"]}],
                "fields": [
                    {"name": "title", "field": "title"},
                    {"name": "author", "follows": [{"link": "author_link"}], "field": "name"}
                ]
            }"#,
            &types,
        )
        .unwrap();

        let record = store.read(&book).unwrap().unwrap();
        let ctx = DerefContext {
            store: &store,
            field_types: &types,
            table: "records",
            vtag: last_vtag_id(),
        };
        let built = build_document(&ctx, &conf, &record, last_vtag_id()).unwrap();

        assert_eq!(built.document.fields.get("title").map(String::as_str), Some("Fruit"));
        assert_eq!(
            built.document.fields.get("author").map(String::as_str),
            Some("A. Writer")
        );
        assert_eq!(built.dependencies.get(&author), Some(&BTreeSet::from([name])));
        assert_eq!(built.document.key, document_key("records", record.id(), &last_vtag_id()));
    }
}
