//! `MsgPack` encoding of [`Value`]s for storage in table fields.

use crate::error::{ObjectStoreError, Result};
use crate::types::Value;

/// Encodes a value into the bytes written to a table field.
///
/// # Errors
///
/// Returns [`ObjectStoreError::Codec`] if serialization fails.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    rmp_serde::to_vec(value).map_err(|e| ObjectStoreError::Codec(e.to_string()))
}

/// Decodes bytes read from a table field.
///
/// # Errors
///
/// Returns [`ObjectStoreError::Codec`] if the bytes are not a valid encoded value.
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    rmp_serde::from_slice(bytes).map_err(|e| ObjectStoreError::Codec(e.to_string()))
}
