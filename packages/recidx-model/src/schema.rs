//! Schema identifiers and field typing.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Opaque, stable identifier of a field type or version-tag field type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SchemaId(Uuid);

impl SchemaId {
    pub fn new() -> Self {
        SchemaId(Uuid::new_v4())
    }

    /// Stable id derived from a field name. Used when resolving
    /// declarative configuration against the schema: the same name
    /// always maps to the same id.
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        SchemaId(Uuid::from_bytes(bytes))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SchemaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Name of the built-in version tag that always points at a record's
/// newest version. Reserved: declaring a stored vtag field with this
/// name is a configuration error.
pub const LAST_VTAG_NAME: &str = "last";

/// The id of the built-in `last` vtag.
pub fn last_vtag_id() -> SchemaId {
    SchemaId::from_name(LAST_VTAG_NAME)
}

/// The scope a field belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Scope {
    NonVersioned,
    Versioned,
    VersionedMutable,
}

/// Field schema entry: how a field is identified and scoped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldType {
    pub id: SchemaId,
    pub name: String,
    pub scope: Scope,
    /// True for version-tag fields (long-valued pointers to a version).
    pub is_vtag: bool,
}

impl FieldType {
    pub fn new(name: impl Into<String>, scope: Scope) -> Self {
        let name = name.into();
        Self {
            id: SchemaId::from_name(&name),
            name,
            scope,
            is_vtag: false,
        }
    }

    /// A version-tag field. Vtag fields always live in the
    /// non-versioned scope.
    pub fn vtag(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: SchemaId::from_name(&name),
            name,
            scope: Scope::NonVersioned,
            is_vtag: true,
        }
    }
}
