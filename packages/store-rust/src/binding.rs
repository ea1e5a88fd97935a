//! Asynchronous adapter for host bindings.
//!
//! Object creation and deletion block on the key-value engine, so the adapter
//! runs them on tokio's blocking pool and resolves a future with the result.
//! Everything else is cheap enough to call directly on [`ObjectStore`].

use objectstore_core::{ObjectStoreError, Result};
use tracing::{debug, error};

use crate::object::ObjectRef;
use crate::store::ObjectStore;

/// Longest session id accepted from a binding, in bytes.
pub const SESSION_ID_MAX_LEN: usize = 31;

fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() || session_id.len() > SESSION_ID_MAX_LEN {
        error!(len = session_id.len(), "rejecting session id");
        return Err(ObjectStoreError::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}

/// Async wrapper over a `'static` [`ObjectStore`].
#[derive(Clone, Copy)]
pub struct AsyncObjectStore {
    store: &'static ObjectStore,
}

impl Default for AsyncObjectStore {
    fn default() -> Self {
        Self::new(ObjectStore::instance())
    }
}

impl AsyncObjectStore {
    #[must_use]
    pub fn new(store: &'static ObjectStore) -> Self {
        Self { store }
    }

    /// The wrapped store.
    #[must_use]
    pub fn store(&self) -> &'static ObjectStore {
        self.store
    }

    /// Creates an object on the blocking pool.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::InvalidSessionId`] if `session_id` is empty or
    ///   longer than [`SESSION_ID_MAX_LEN`]
    /// - [`ObjectStoreError::TaskFailed`] if the blocking task panics
    /// - any [`ObjectStore::create_object`] error
    pub async fn create_object(&self, session_id: &str) -> Result<ObjectRef> {
        validate_session_id(session_id)?;
        let store = self.store;
        let session_id = session_id.to_string();
        debug!(session_id, "scheduling object creation");
        tokio::task::spawn_blocking(move || store.create_object(&session_id))
            .await
            .map_err(|err| ObjectStoreError::TaskFailed(err.to_string()))?
    }

    /// Deletes an object on the blocking pool.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::InvalidSessionId`] if `session_id` is empty or
    ///   longer than [`SESSION_ID_MAX_LEN`]
    /// - [`ObjectStoreError::TaskFailed`] if the blocking task panics
    /// - any [`ObjectStore::delete_object`] error
    pub async fn delete_object(&self, session_id: &str) -> Result<()> {
        validate_session_id(session_id)?;
        let store = self.store;
        let session_id = session_id.to_string();
        debug!(session_id, "scheduling object deletion");
        tokio::task::spawn_blocking(move || store.delete_object(&session_id))
            .await
            .map_err(|err| ObjectStoreError::TaskFailed(err.to_string()))?
    }

    /// Synchronous creation with the same session id checks.
    ///
    /// # Errors
    ///
    /// Same as [`create_object`](Self::create_object), minus `TaskFailed`.
    pub fn create_object_blocking(&self, session_id: &str) -> Result<ObjectRef> {
        validate_session_id(session_id)?;
        self.store.create_object(session_id)
    }

    /// Synchronous deletion with the same session id checks.
    ///
    /// # Errors
    ///
    /// Same as [`delete_object`](Self::delete_object), minus `TaskFailed`.
    pub fn delete_object_blocking(&self, session_id: &str) -> Result<()> {
        validate_session_id(session_id)?;
        self.store.delete_object(session_id)
    }
}
