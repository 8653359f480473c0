//! Builds an `IndexerConf` from its declarative JSON blob, resolving
//! field names against the schema and validating up front.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use recidx_model::{FieldType, SchemaId, Scope, LAST_VTAG_NAME};

use crate::features::conf::model::{CaseRule, ConfError, IndexField, IndexerConf};
use crate::features::deref::Follow;
use crate::features::repository::FieldTypes;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConfJson {
    #[serde(default)]
    cases: Vec<CaseJson>,
    #[serde(default)]
    fields: Vec<FieldJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CaseJson {
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    record_types: Vec<String>,
    #[serde(default)]
    variant_props: BTreeMap<String, String>,
    #[serde(default)]
    vtags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FieldJson {
    name: String,
    #[serde(default)]
    follows: Vec<FollowJson>,
    field: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FollowJson {
    /// Follow a link field to the record it points at.
    Link(String),
    /// Step from a variant record to its master.
    Master,
    /// Step to the variant with the named dimensions removed.
    Variant(Vec<String>),
}

pub struct IndexerConfBuilder;

impl IndexerConfBuilder {
    pub fn build(json: &[u8], field_types: &FieldTypes) -> Result<IndexerConf, ConfError> {
        // A stored field named `last` would silently shadow the
        // built-in newest-version tag; reject it outright.
        if field_types.by_name(LAST_VTAG_NAME).is_some() {
            return Err(ConfError::ReservedVtagName(LAST_VTAG_NAME.to_string()));
        }

        let parsed: ConfJson = serde_json::from_slice(json)?;

        let mut cases = Vec::with_capacity(parsed.cases.len());
        for case in parsed.cases {
            let mut version_tags = BTreeSet::new();
            for name in &case.vtags {
                version_tags.insert(resolve_vtag(name, field_types)?);
            }
            cases.push(CaseRule {
                table: case.table,
                record_types: case.record_types.into_iter().collect(),
                variant_props: case.variant_props,
                version_tags,
            });
        }

        let mut seen_names = BTreeSet::new();
        let mut fields = Vec::with_capacity(parsed.fields.len());
        let mut affecting: BTreeMap<Scope, BTreeSet<SchemaId>> = BTreeMap::new();
        for field in parsed.fields {
            if !seen_names.insert(field.name.clone()) {
                return Err(ConfError::DuplicateIndexField(field.name));
            }

            let target = resolve_field(&field.field, field_types)?;
            let follows = field
                .follows
                .iter()
                .map(|f| resolve_follow(f, field_types))
                .collect::<Result<Vec<_>, _>>()?;

            // The locally-read field is what makes a change to this
            // record affect the index: the target itself for a direct
            // field, the first link field for a deref chain.
            let local = match follows.first() {
                None => Some(target.id),
                Some(Follow::Link { field }) => Some(*field),
                Some(Follow::Master) | Some(Follow::Variant { .. }) => None,
            };
            if let Some(local_id) = local {
                if let Some(ft) = field_types.by_id(&local_id) {
                    affecting.entry(ft.scope).or_default().insert(local_id);
                }
            }

            fields.push(IndexField {
                name: field.name,
                follows,
                field: target.id,
            });
        }

        Ok(IndexerConf::new(cases, fields, affecting))
    }
}

fn resolve_field<'a>(name: &str, field_types: &'a FieldTypes) -> Result<&'a FieldType, ConfError> {
    field_types
        .by_name(name)
        .ok_or_else(|| ConfError::UnknownField(name.to_string()))
}

fn resolve_vtag(name: &str, field_types: &FieldTypes) -> Result<SchemaId, ConfError> {
    if name == LAST_VTAG_NAME {
        return Ok(recidx_model::last_vtag_id());
    }
    let ft = resolve_field(name, field_types)?;
    if !ft.is_vtag {
        return Err(ConfError::NotAVtag(name.to_string()));
    }
    Ok(ft.id)
}

fn resolve_follow(follow: &FollowJson, field_types: &FieldTypes) -> Result<Follow, ConfError> {
    Ok(match follow {
        FollowJson::Link(field) => Follow::Link {
            field: resolve_field(field, field_types)?.id,
        },
        FollowJson::Master => Follow::Master,
        FollowJson::Variant(dimensions) => Follow::Variant {
            dimensions: dimensions.iter().cloned().collect(),
        },
    })
}
