//! Process-wide object store facade.

use std::sync::{Arc, OnceLock};

use objectstore_core::{KvEngine, ObjectStoreError, Result};
use tracing::{error, info};

use crate::config::StoreConfig;
use crate::object::{ObjectCache, ObjectRef, ObjectWatcher};
use crate::storage::engines::MemoryKvEngine;
use crate::storage::TableEngine;

static INSTANCE: OnceLock<ObjectStore> = OnceLock::new();

/// Entry point for creating, syncing, watching and deleting objects.
///
/// One instance per process is reachable through [`ObjectStore::instance`].
/// It is built on first access and lives until the process exits; no
/// teardown runs. Independent instances can be built with
/// [`ObjectStore::new`] for embedding and tests.
pub struct ObjectStore {
    cache: ObjectCache,
}

impl ObjectStore {
    /// Builds a store over `kv` and opens its table engine.
    ///
    /// If the engine cannot be opened the store is still returned, and every
    /// operation on it fails with [`ObjectStoreError::NullObjectStore`].
    #[must_use]
    pub fn new(config: StoreConfig, kv: Arc<dyn KvEngine>) -> Self {
        let engine = TableEngine::new(config, kv);
        let engine = match engine.open() {
            Ok(()) => Some(engine),
            Err(err) => {
                error!(%err, "failed to open storage engine, object store is unusable");
                None
            }
        };
        Self {
            cache: ObjectCache::new(engine),
        }
    }

    /// The process-wide store, built on first call over an in-memory engine
    /// with [`StoreConfig::default`].
    #[must_use]
    pub fn instance() -> &'static ObjectStore {
        INSTANCE.get_or_init(|| {
            info!("initializing process-wide object store");
            ObjectStore::new(StoreConfig::default(), Arc::new(MemoryKvEngine::default()))
        })
    }

    /// Installs the process-wide store over `kv` before first use.
    ///
    /// # Errors
    ///
    /// [`ObjectStoreError::AlreadyExists`] if the process-wide store has
    /// already been built.
    pub fn install(config: StoreConfig, kv: Arc<dyn KvEngine>) -> Result<&'static ObjectStore> {
        let already = || {
            error!("process-wide object store already initialized");
            ObjectStoreError::AlreadyExists("process-wide object store".to_string())
        };
        if INSTANCE.get().is_some() {
            return Err(already());
        }
        INSTANCE
            .set(ObjectStore::new(config, kv))
            .map_err(|_| already())?;
        INSTANCE.get().ok_or(ObjectStoreError::NullObjectStore)
    }

    /// The table engine, if it opened.
    #[must_use]
    pub fn engine(&self) -> Option<&TableEngine> {
        self.cache.engine().ok()
    }

    /// Reopens the table engine after [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// [`ObjectStoreError::NullObjectStore`] or the [`TableEngine::open`] error.
    pub fn open(&self) -> Result<()> {
        self.cache.engine()?.open()
    }

    /// See [`ObjectCache::create_object`].
    ///
    /// # Errors
    ///
    /// See [`ObjectCache::create_object`].
    pub fn create_object(&self, session_id: &str) -> Result<ObjectRef> {
        self.cache.create_object(session_id)
    }

    /// See [`ObjectCache::delete_object`].
    ///
    /// # Errors
    ///
    /// See [`ObjectCache::delete_object`].
    pub fn delete_object(&self, session_id: &str) -> Result<()> {
        self.cache.delete_object(session_id)
    }

    /// See [`ObjectCache::sync`].
    ///
    /// # Errors
    ///
    /// See [`ObjectCache::sync`].
    pub fn sync(&self, object: Option<&ObjectRef>) -> Result<()> {
        self.cache.sync(object)
    }

    /// See [`ObjectCache::get`].
    ///
    /// # Errors
    ///
    /// See [`ObjectCache::get`].
    pub fn get(&self, object_id: &str) -> Result<ObjectRef> {
        self.cache.get(object_id)
    }

    /// See [`ObjectCache::watch`].
    ///
    /// # Errors
    ///
    /// See [`ObjectCache::watch`].
    pub fn watch(&self, object: Option<&ObjectRef>, watcher: Arc<dyn ObjectWatcher>) -> Result<()> {
        self.cache.watch(object, watcher)
    }

    /// See [`ObjectCache::unwatch`].
    ///
    /// # Errors
    ///
    /// See [`ObjectCache::unwatch`].
    pub fn unwatch(&self, object: Option<&ObjectRef>) -> Result<()> {
        self.cache.unwatch(object)
    }

    /// See [`ObjectCache::change_session`].
    ///
    /// # Errors
    ///
    /// See [`ObjectCache::change_session`].
    pub fn change_session(&self, object_id: &str, new_session_id: &str) -> Result<()> {
        self.cache.change_session(object_id, new_session_id)
    }

    /// See [`ObjectCache::close`].
    ///
    /// # Errors
    ///
    /// See [`ObjectCache::close`].
    pub fn close(&self) -> Result<()> {
        self.cache.close()
    }
}
