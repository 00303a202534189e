//! Cached record and field identifiers

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A cached credential record.
///
/// Both payload slots are opaque bytes. A record with an absent primary blob
/// and no fields is equivalent to "not present" and is never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Primary blob
    #[serde(default)]
    pub primary: Option<Vec<u8>>,
    /// Field map, keyed by the flattened `"{category}-{id}"` name
    #[serde(default)]
    pub fields: HashMap<String, Vec<u8>>,
}

impl Record {
    pub fn with_primary(primary: impl Into<Vec<u8>>) -> Self {
        Self {
            primary: Some(primary.into()),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, field: &FieldId, value: impl Into<Vec<u8>>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.fields.is_empty()
    }

    /// Approximate payload size in bytes
    pub fn estimated_size(&self) -> u64 {
        let primary = self.primary.as_ref().map_or(0, Vec::len);
        let fields: usize = self.fields.iter().map(|(k, v)| k.len() + v.len()).sum();
        (primary + fields) as u64
    }
}

/// Identifier of one entry in a record's field map.
///
/// Nested `category -> id -> value` maps are flattened into a single
/// hash-like structure per record using `"{category}-{id}"` field names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId {
    pub category: String,
    pub id: String,
}

impl FieldId {
    pub fn new(category: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.category, self.id)
    }
}
