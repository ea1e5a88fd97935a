//! Cache of live object handles and their watchers.
//!
//! The cache lock guards the handle list and the watcher map. Whenever both
//! locks are needed the cache lock is taken first, then the engine lock inside
//! [`TableEngine`]; the engine never calls back into the cache while holding
//! its own lock.

use std::collections::HashMap;
use std::sync::Arc;

use objectstore_core::{FieldMap, KvStoreObserver, ObjectStoreError, Result};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    session_entry, DistributedObject, FlatObject, ObjectRef, ObjectWatcher, WatcherBridge,
    SESSION_ID_FIELD,
};
use crate::storage::{same_observer, TableEngine};

#[derive(Default)]
struct CacheState {
    objects: Vec<ObjectRef>,
    watchers: HashMap<Uuid, Arc<WatcherBridge>>,
}

/// Live object handles over one [`TableEngine`].
///
/// Built without an engine, every operation that needs one fails with
/// [`ObjectStoreError::NullObjectStore`].
pub struct ObjectCache {
    engine: Option<TableEngine>,
    state: RwLock<CacheState>,
}

impl ObjectCache {
    #[must_use]
    pub fn new(engine: Option<TableEngine>) -> Self {
        Self {
            engine,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// The engine backing this cache.
    ///
    /// # Errors
    ///
    /// [`ObjectStoreError::NullObjectStore`] if the cache has no engine.
    pub fn engine(&self) -> Result<&TableEngine> {
        self.engine.as_ref().ok_or_else(|| {
            error!("object store has no storage engine");
            ObjectStoreError::NullObjectStore
        })
    }

    /// Opens (or reopens) the table for `session_id` and returns a new handle
    /// over its current contents.
    ///
    /// A failed initial read or write-back is logged and the handle is still
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NullObjectStore`] if there is no engine
    /// - the [`TableEngine::create_table`] error if the table cannot be opened
    /// - [`ObjectStoreError::AllocationFailure`] if the cache cannot grow
    pub fn create_object(&self, session_id: &str) -> Result<ObjectRef> {
        let engine = self.engine()?;
        engine.create_table(session_id)?;

        let snapshot = engine.get_table(session_id).unwrap_or_else(|err| {
            warn!(session_id, %err, "failed to read initial object state");
            FieldMap::new()
        });
        let object = FlatObject::new(session_id, snapshot)?;
        if let Err(err) = engine.update_items(session_id, &object.snapshot()) {
            warn!(session_id, %err, "failed to write initial object state");
        }

        let object: ObjectRef = Arc::new(object);
        let mut state = self.state.write();
        state.objects.try_reserve(1).map_err(|err| {
            error!(session_id, %err, "failed to grow object cache");
            ObjectStoreError::AllocationFailure(err.to_string())
        })?;
        state.objects.push(Arc::clone(&object));
        info!(session_id, handle = %object.handle_id(), "object created");
        Ok(object)
    }

    /// Writes every field of `object` to its table in one batch.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NullObject`] if `object` is `None`
    /// - [`ObjectStoreError::NullObjectStore`] if there is no engine
    /// - [`ObjectStoreError::NotFound`] if the handle has been detached
    /// - the [`TableEngine::update_items`] error otherwise
    pub fn sync(&self, object: Option<&ObjectRef>) -> Result<()> {
        let object = object.ok_or(ObjectStoreError::NullObject)?;
        let engine = self.engine()?;
        let key = object.object_id()?;
        engine.update_items(&key, &object.snapshot())
    }

    /// Deletes the table for `session_id`.
    ///
    /// Every cached handle bound to the session is evicted and detached, and
    /// its watcher association is dropped.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NullObjectStore`] if there is no engine
    /// - the [`TableEngine::delete_table`] error otherwise
    pub fn delete_object(&self, session_id: &str) -> Result<()> {
        let engine = self.engine()?;
        let mut state = self.state.write();
        engine.delete_table(session_id)?;

        let CacheState { objects, watchers } = &mut *state;
        objects.retain(|object| match object.object_id() {
            Ok(id) if id == session_id => {
                object.detach();
                watchers.remove(&object.handle_id());
                false
            }
            _ => true,
        });
        info!(session_id, "object deleted");
        Ok(())
    }

    /// Finds the cached handle bound to `object_id`.
    ///
    /// # Errors
    ///
    /// [`ObjectStoreError::GetFailure`] if no handle matches or a handle's id
    /// cannot be resolved.
    pub fn get(&self, object_id: &str) -> Result<ObjectRef> {
        let state = self.state.read();
        for object in &state.objects {
            match object.object_id() {
                Ok(id) if id == object_id => return Ok(Arc::clone(object)),
                Ok(_) => {}
                Err(err) => {
                    error!(object_id, %err, "failed to resolve cached object id");
                    return Err(ObjectStoreError::GetFailure(object_id.to_string()));
                }
            }
        }
        error!(object_id, "no cached object");
        Err(ObjectStoreError::GetFailure(object_id.to_string()))
    }

    /// Attaches `watcher` to `object`.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NullObject`] if `object` is `None`
    /// - [`ObjectStoreError::NullObjectStore`] if there is no engine
    /// - [`ObjectStoreError::AlreadyWatched`] if the handle has a watcher
    /// - the id resolution or [`TableEngine::register_observer`] error otherwise
    pub fn watch(&self, object: Option<&ObjectRef>, watcher: Arc<dyn ObjectWatcher>) -> Result<()> {
        let object = object.ok_or(ObjectStoreError::NullObject)?;
        let engine = self.engine()?;
        let handle_id = object.handle_id();

        let mut state = self.state.write();
        if state.watchers.contains_key(&handle_id) {
            error!(handle = %handle_id, "object already watched");
            return Err(ObjectStoreError::AlreadyWatched(handle_id.to_string()));
        }
        let key = object.object_id()?;
        let bridge = Arc::new(WatcherBridge::new(Arc::clone(object), watcher));
        engine.register_observer(&key, Arc::clone(&bridge) as Arc<dyn KvStoreObserver>)?;
        state.watchers.insert(handle_id, bridge);
        debug!(key, handle = %handle_id, "object watched");
        Ok(())
    }

    /// Detaches the watcher of `object`.
    ///
    /// The engine observer is only removed if it is this handle's watcher; the
    /// association is cleared either way.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NullObject`] if `object` is `None`
    /// - [`ObjectStoreError::NullObjectStore`] if there is no engine
    /// - [`ObjectStoreError::NoObserver`] if the handle is not watched
    /// - the id resolution or [`TableEngine::unregister_observer`] error otherwise
    pub fn unwatch(&self, object: Option<&ObjectRef>) -> Result<()> {
        let object = object.ok_or(ObjectStoreError::NullObject)?;
        let engine = self.engine()?;
        let handle_id = object.handle_id();

        let mut state = self.state.write();
        let Some(bridge) = state.watchers.get(&handle_id).cloned() else {
            error!(handle = %handle_id, "object is not watched");
            return Err(ObjectStoreError::NoObserver(handle_id.to_string()));
        };
        let key = object.object_id()?;
        let bridge: Arc<dyn KvStoreObserver> = bridge;
        match engine.observer(&key) {
            Ok(installed) if same_observer(&installed, &bridge) => {
                engine.unregister_observer(&key)?;
            }
            Ok(_) | Err(ObjectStoreError::NoObserver(_)) => {
                debug!(key, "watcher was not installed on the table");
            }
            Err(err) => return Err(err),
        }
        state.watchers.remove(&handle_id);
        debug!(key, handle = %handle_id, "object unwatched");
        Ok(())
    }

    /// Deletes the table of every cached handle, releases the handles, then
    /// closes the engine.
    ///
    /// Per-object failures are logged and do not stop the close.
    ///
    /// # Errors
    ///
    /// [`ObjectStoreError::NullObjectStore`] if there is no engine.
    pub fn close(&self) -> Result<()> {
        let engine = self.engine()?;
        let mut state = self.state.write();
        for object in state.objects.drain(..) {
            match object.object_id() {
                Ok(key) => {
                    if let Err(err) = engine.delete_table(&key) {
                        warn!(key, %err, "failed to delete table during close");
                    }
                }
                Err(err) => warn!(handle = %object.handle_id(), %err, "skipping unresolvable object"),
            }
            object.detach();
        }
        state.watchers.clear();
        engine.close()
    }

    /// Moves the object bound to `object_id` to `new_session_id`.
    ///
    /// The table is renamed in place, every cached handle is rebound and the
    /// reserved session field is rewritten. Watchers stay attached and report
    /// the new id.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NullObjectStore`] if there is no engine
    /// - the [`TableEngine::rename_table`] error; on
    ///   [`ObjectStoreError::RegisterFailure`] the handles are still rebound
    pub fn change_session(&self, object_id: &str, new_session_id: &str) -> Result<()> {
        let engine = self.engine()?;
        let renamed = {
            let state = self.state.write();
            let renamed = match engine.rename_table(object_id, new_session_id) {
                Ok(()) => Ok(()),
                Err(err @ ObjectStoreError::RegisterFailure { .. }) => Err(err),
                Err(err) => return Err(err),
            };
            for object in &state.objects {
                if matches!(object.object_id(), Ok(id) if id == object_id) {
                    object.rebind_session(new_session_id)?;
                }
            }
            renamed
        };

        let mut canonical = FieldMap::new();
        canonical.insert(SESSION_ID_FIELD.to_vec(), session_entry(new_session_id)?);
        engine.update_items(new_session_id, &canonical)?;
        info!(object_id, new_session_id, "session changed");
        renamed
    }

    /// Number of cached handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().objects.is_empty()
    }

    /// Whether `object` currently has a watcher.
    #[must_use]
    pub fn is_watched(&self, object: &ObjectRef) -> bool {
        self.state.read().watchers.contains_key(&object.handle_id())
    }
}
