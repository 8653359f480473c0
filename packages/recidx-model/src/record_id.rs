//! Record identifiers.
//!
//! A record id is a master id plus an ordered set of variant
//! dimension properties (for example `doc1;lang=en,branch=dev`).
//! A record without variant properties is a "master". The byte
//! encoding of a record id is the raw change-log key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordIdParseError {
    #[error("record id is not valid UTF-8")]
    InvalidUtf8,
    #[error("empty master id in record id '{0}'")]
    EmptyMaster(String),
    #[error("malformed variant property '{0}' (expected key=value)")]
    MalformedProperty(String),
}

/// Identifier of a record within one table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    master: String,
    /// Variant dimension properties, ordered by key. Empty for a master record.
    variant_props: BTreeMap<String, String>,
}

impl RecordId {
    pub fn master(id: impl Into<String>) -> Self {
        Self {
            master: id.into(),
            variant_props: BTreeMap::new(),
        }
    }

    pub fn variant(id: impl Into<String>, props: BTreeMap<String, String>) -> Self {
        Self {
            master: id.into(),
            variant_props: props,
        }
    }

    pub fn master_id(&self) -> &str {
        &self.master
    }

    pub fn variant_props(&self) -> &BTreeMap<String, String> {
        &self.variant_props
    }

    pub fn is_master(&self) -> bool {
        self.variant_props.is_empty()
    }

    /// The master record id this id descends from (self, if already a master).
    pub fn to_master(&self) -> RecordId {
        RecordId::master(self.master.clone())
    }

    /// A variant id with the given dimensions removed.
    pub fn without_dimensions<'a>(&self, dimensions: impl IntoIterator<Item = &'a str>) -> RecordId {
        let mut props = self.variant_props.clone();
        for dim in dimensions {
            props.remove(dim);
        }
        RecordId {
            master: self.master.clone(),
            variant_props: props,
        }
    }

    /// Raw change-log key encoding: `master` or `master;k=v,k=v`
    /// with properties in key order.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordIdParseError> {
        let s = std::str::from_utf8(bytes).map_err(|_| RecordIdParseError::InvalidUtf8)?;
        s.parse()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.master)?;
        let mut sep = ';';
        for (k, v) in &self.variant_props {
            write!(f, "{}{}={}", sep, k, v)?;
            sep = ',';
        }
        Ok(())
    }
}

impl std::str::FromStr for RecordId {
    type Err = RecordIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (master, rest) = match s.split_once(';') {
            Some((m, r)) => (m, Some(r)),
            None => (s, None),
        };
        if master.is_empty() {
            return Err(RecordIdParseError::EmptyMaster(s.to_string()));
        }
        let mut props = BTreeMap::new();
        if let Some(rest) = rest {
            for pair in rest.split(',') {
                let (k, v) = pair
                    .split_once('=')
                    .ok_or_else(|| RecordIdParseError::MalformedProperty(pair.to_string()))?;
                if k.is_empty() {
                    return Err(RecordIdParseError::MalformedProperty(pair.to_string()));
                }
                props.insert(k.to_string(), v.to_string());
            }
        }
        Ok(RecordId {
            master: master.to_string(),
            variant_props: props,
        })
    }
}

/// The unit of identity across the whole system: a record id
/// qualified by the table it lives in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AbsoluteRecordId {
    table: String,
    id: RecordId,
}

impl AbsoluteRecordId {
    pub fn new(table: impl Into<String>, id: RecordId) -> Self {
        Self {
            table: table.into(),
            id,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn record_id(&self) -> &RecordId {
        &self.id
    }
}

impl fmt::Display for AbsoluteRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.id)
    }
}
