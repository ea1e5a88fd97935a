use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Raw field identifier inside a table.
pub type Field = Vec<u8>;

/// Raw field value inside a table.
pub type FieldValue = Vec<u8>;

/// Unordered field/value snapshot of one table.
pub type FieldMap = HashMap<Field, FieldValue>;

/// A single key/value pair as exchanged with the key-value engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Field identifier.
    pub key: Field,
    /// Encoded field value.
    pub value: FieldValue,
}

impl Entry {
    /// Creates an entry from anything convertible into bytes.
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Typed value stored in an object field.
///
/// Serializes to `MsgPack` via `rmp-serde` before it is written into a table,
/// so every device sharing the table decodes the same representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit IEEE 754 number.
    Double(f64),
    /// Boolean flag.
    Boolean(bool),
    /// UTF-8 string.
    String(String),
    /// Opaque binary payload, typically a nested serialized structure.
    Complex(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl Value {
    /// Returns the discriminant of this value.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Double(_) => ValueType::Double,
            Self::Boolean(_) => ValueType::Boolean,
            Self::String(_) => ValueType::String,
            Self::Complex(_) => ValueType::Complex,
        }
    }
}

/// Discriminant for [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Double,
    Boolean,
    String,
    Complex,
}
