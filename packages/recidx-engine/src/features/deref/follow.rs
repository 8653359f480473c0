//! Follow strategies and their dispatcher.
//!
//! A closed set of strategies, each a pure step
//! `(current record context) -> next record context`. A chain that
//! cannot be completed (missing link value, missing dimensions,
//! vanished record) yields no value; dependencies on the records
//! actually reached are still recorded so a later appearance of the
//! missing piece re-triggers indexing.

use std::collections::{BTreeMap, BTreeSet};

use recidx_model::{AbsoluteRecordId, FieldValue, Record, RecordId, SchemaId};

use crate::features::conf::IndexField;
use crate::features::repository::{FieldTypes, RecordStore, VTaggedRecord};
use crate::Result;

/// One step of a dereference chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Follow {
    /// Follow a link field to the record it points at.
    Link { field: SchemaId },
    /// Step from a variant record to its master.
    Master,
    /// Step to the variant with the given dimensions removed.
    Variant { dimensions: BTreeSet<String> },
}

/// Everything the dispatcher needs to walk a chain.
pub struct DerefContext<'a> {
    pub store: &'a dyn RecordStore,
    pub field_types: &'a FieldTypes,
    pub table: &'a str,
    /// The vtag the document is being built under; linked records
    /// are read at the version *their own* copy of this tag points at.
    pub vtag: SchemaId,
}

/// The outcome of resolving one index field.
#[derive(Debug, Default)]
pub struct Resolution {
    pub value: Option<FieldValue>,
    /// Records other than the dependant that were consulted, with the
    /// fields read from each (empty set: reached but nothing read yet).
    pub dependencies: BTreeMap<AbsoluteRecordId, BTreeSet<SchemaId>>,
}

/// Resolve an index field for `start` (the record being indexed, as
/// seen under `ctx.vtag`).
pub fn resolve_index_value(
    ctx: &DerefContext<'_>,
    start: &Record,
    expr: &IndexField,
) -> Result<Resolution> {
    let mut resolution = Resolution::default();
    let mut cur_id: RecordId = start.id().clone();
    let mut cur_record: Option<Record> = Some(start.clone());
    // While true, reads target the dependant itself and create no edge.
    let mut local = true;

    for follow in &expr.follows {
        let next_id = match follow {
            Follow::Link { field } => {
                note_read(&mut resolution, ctx.table, &cur_id, *field, local);
                cur_record
                    .as_ref()
                    .and_then(|r| r.field(field))
                    .and_then(FieldValue::as_link)
                    .cloned()
            }
            Follow::Master => Some(cur_id.to_master()),
            Follow::Variant { dimensions } => {
                if dimensions
                    .iter()
                    .all(|d| cur_id.variant_props().contains_key(d))
                {
                    Some(cur_id.without_dimensions(dimensions.iter().map(String::as_str)))
                } else {
                    // Not enough dimensions to subtract: dead end.
                    None
                }
            }
        };

        match next_id {
            Some(id) if id != cur_id => {
                cur_record = read_under_vtag(ctx, &id)?;
                cur_id = id;
                local = false;
            }
            Some(_) => {
                // No-op hop (e.g. master-follow on a master record).
            }
            None => {
                return Ok(resolution);
            }
        }
    }

    note_read(&mut resolution, ctx.table, &cur_id, expr.field, local);
    resolution.value = cur_record.and_then(|r| r.field(&expr.field).cloned());
    Ok(resolution)
}

fn note_read(
    resolution: &mut Resolution,
    table: &str,
    id: &RecordId,
    field: SchemaId,
    local: bool,
) {
    if local {
        return;
    }
    resolution
        .dependencies
        .entry(AbsoluteRecordId::new(table, id.clone()))
        .or_default()
        .insert(field);
}

/// Read a record's state under the context vtag: the version the
/// record's own copy of the tag points at. A record without versions
/// resolves under any tag as its non-versioned state (its fields may
/// be dereferenced into multiple vtagged versions of a dependant).
/// A missing record or a versioned record without the tag reads as
/// `None`; both are normal.
fn read_under_vtag(ctx: &DerefContext<'_>, id: &RecordId) -> Result<Option<Record>> {
    let abs = AbsoluteRecordId::new(ctx.table, id.clone());
    let vt = match VTaggedRecord::read(ctx.store, ctx.field_types, &abs, None)? {
        Some(vt) => vt,
        None => return Ok(None),
    };
    match vt.record_at(ctx.store, &ctx.vtag)? {
        Some(record) => Ok(Some(record)),
        None if vt.record().version().is_none() => Ok(Some(vt.record().clone())),
        None => Ok(None),
    }
}
