//! Object handles and the cache that tracks them.
//!
//! A handle is the in-process view of one session's fields. Writes through a
//! handle are local until the cache syncs it into the backing table.

pub mod cache;
pub mod watcher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use objectstore_core::{
    decode_value, encode_value, FieldMap, ObjectStoreError, Result, Value, ValueType,
};
use parking_lot::RwLock;
use uuid::Uuid;

pub use cache::ObjectCache;
pub use watcher::{ObjectWatcher, WatcherBridge};

/// Reserved field holding the session id of the object.
pub const SESSION_ID_FIELD: &[u8] = b"__sessionId";

/// Shared handle to a cached object.
pub type ObjectRef = Arc<dyn DistributedObject>;

/// Capability surface of an object handle.
///
/// Implementations store encoded [`Value`]s keyed by field name. The typed
/// accessors are provided on top of [`put_value`](Self::put_value) and
/// [`get_value`](Self::get_value).
pub trait DistributedObject: Send + Sync {
    /// Stable identity of this handle, independent of its session.
    fn handle_id(&self) -> Uuid;

    /// Session id this handle is currently bound to.
    ///
    /// # Errors
    ///
    /// [`ObjectStoreError::NotFound`] if the handle is detached or the
    /// reserved field is missing.
    fn object_id(&self) -> Result<String>;

    /// Copy of every field, including the reserved session field.
    fn snapshot(&self) -> FieldMap;

    /// Stores `value` under `field` locally.
    ///
    /// # Errors
    ///
    /// [`ObjectStoreError::NotFound`] if the handle is detached.
    fn put_value(&self, field: &str, value: &Value) -> Result<()>;

    /// Reads and decodes `field`.
    ///
    /// # Errors
    ///
    /// [`ObjectStoreError::NotFound`] if the handle is detached or the field
    /// is absent, [`ObjectStoreError::Codec`] if the stored bytes do not decode.
    fn get_value(&self, field: &str) -> Result<Value>;

    /// Rewrites the reserved session field to `session_id`.
    ///
    /// # Errors
    ///
    /// [`ObjectStoreError::NotFound`] if the handle is detached.
    fn rebind_session(&self, session_id: &str) -> Result<()>;

    /// Marks the handle as no longer backed by a table.
    fn detach(&self);

    fn is_detached(&self) -> bool;

    /// # Errors
    ///
    /// See [`put_value`](Self::put_value).
    fn put_double(&self, field: &str, value: f64) -> Result<()> {
        self.put_value(field, &Value::Double(value))
    }

    /// # Errors
    ///
    /// See [`put_value`](Self::put_value).
    fn put_boolean(&self, field: &str, value: bool) -> Result<()> {
        self.put_value(field, &Value::Boolean(value))
    }

    /// # Errors
    ///
    /// See [`put_value`](Self::put_value).
    fn put_string(&self, field: &str, value: &str) -> Result<()> {
        self.put_value(field, &Value::String(value.to_string()))
    }

    /// # Errors
    ///
    /// See [`put_value`](Self::put_value).
    fn put_complex(&self, field: &str, value: &[u8]) -> Result<()> {
        self.put_value(field, &Value::Complex(value.to_vec()))
    }

    /// # Errors
    ///
    /// [`ObjectStoreError::TypeMismatch`] if the field is not a double, plus
    /// the errors of [`get_value`](Self::get_value).
    fn get_double(&self, field: &str) -> Result<f64> {
        match self.get_value(field)? {
            Value::Double(v) => Ok(v),
            other => Err(mismatch(field, ValueType::Double, &other)),
        }
    }

    /// # Errors
    ///
    /// [`ObjectStoreError::TypeMismatch`] if the field is not a boolean, plus
    /// the errors of [`get_value`](Self::get_value).
    fn get_boolean(&self, field: &str) -> Result<bool> {
        match self.get_value(field)? {
            Value::Boolean(v) => Ok(v),
            other => Err(mismatch(field, ValueType::Boolean, &other)),
        }
    }

    /// # Errors
    ///
    /// [`ObjectStoreError::TypeMismatch`] if the field is not a string, plus
    /// the errors of [`get_value`](Self::get_value).
    fn get_string(&self, field: &str) -> Result<String> {
        match self.get_value(field)? {
            Value::String(v) => Ok(v),
            other => Err(mismatch(field, ValueType::String, &other)),
        }
    }

    /// # Errors
    ///
    /// [`ObjectStoreError::TypeMismatch`] if the field is not a byte payload,
    /// plus the errors of [`get_value`](Self::get_value).
    fn get_complex(&self, field: &str) -> Result<Vec<u8>> {
        match self.get_value(field)? {
            Value::Complex(v) => Ok(v),
            other => Err(mismatch(field, ValueType::Complex, &other)),
        }
    }

    /// Type of the value stored under `field`.
    ///
    /// # Errors
    ///
    /// See [`get_value`](Self::get_value).
    fn get_type(&self, field: &str) -> Result<ValueType> {
        self.get_value(field).map(|v| v.value_type())
    }
}

fn mismatch(field: &str, expected: ValueType, actual: &Value) -> ObjectStoreError {
    ObjectStoreError::TypeMismatch {
        field: field.to_string(),
        expected,
        actual: actual.value_type(),
    }
}

/// Default [`DistributedObject`]: a flat map of encoded fields.
pub struct FlatObject {
    handle_id: Uuid,
    fields: RwLock<FieldMap>,
    detached: AtomicBool,
}

impl FlatObject {
    /// Wraps a table snapshot, binding it to `session_id`.
    ///
    /// The reserved session field is always set to `session_id`, whatever
    /// the snapshot held.
    ///
    /// # Errors
    ///
    /// [`ObjectStoreError::Codec`] if the session field cannot be encoded.
    pub fn new(session_id: &str, mut snapshot: FieldMap) -> Result<Self> {
        snapshot.insert(SESSION_ID_FIELD.to_vec(), session_entry(session_id)?);
        Ok(Self {
            handle_id: Uuid::new_v4(),
            fields: RwLock::new(snapshot),
            detached: AtomicBool::new(false),
        })
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.is_detached() {
            return Err(ObjectStoreError::NotFound(format!(
                "object handle {}",
                self.handle_id
            )));
        }
        Ok(())
    }
}

/// Encoded value of the reserved session field for `session_id`.
///
/// # Errors
///
/// [`ObjectStoreError::Codec`] if encoding fails.
pub fn session_entry(session_id: &str) -> Result<Vec<u8>> {
    encode_value(&Value::String(session_id.to_string()))
}

impl DistributedObject for FlatObject {
    fn handle_id(&self) -> Uuid {
        self.handle_id
    }

    fn object_id(&self) -> Result<String> {
        self.ensure_attached()?;
        let field = String::from_utf8_lossy(SESSION_ID_FIELD);
        match self.get_value(&field)? {
            Value::String(id) => Ok(id),
            other => Err(mismatch(&field, ValueType::String, &other)),
        }
    }

    fn snapshot(&self) -> FieldMap {
        self.fields.read().clone()
    }

    fn put_value(&self, field: &str, value: &Value) -> Result<()> {
        self.ensure_attached()?;
        let encoded = encode_value(value)?;
        self.fields
            .write()
            .insert(field.as_bytes().to_vec(), encoded);
        Ok(())
    }

    fn get_value(&self, field: &str) -> Result<Value> {
        self.ensure_attached()?;
        let fields = self.fields.read();
        let bytes = fields
            .get(field.as_bytes())
            .ok_or_else(|| ObjectStoreError::NotFound(format!("field {field}")))?;
        decode_value(bytes)
    }

    fn rebind_session(&self, session_id: &str) -> Result<()> {
        self.ensure_attached()?;
        let entry = session_entry(session_id)?;
        self.fields.write().insert(SESSION_ID_FIELD.to_vec(), entry);
        Ok(())
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}
