//! Session-keyed table engine over the replicated key-value engine.
//!
//! [`TableEngine`] owns the map from session key to backing table and the map
//! from session key to installed observer. Both maps live behind a single
//! `RwLock`, so a rename moves a table and its observer in one step and no
//! lookup can observe a half-applied delete or rename. Pure reads take the
//! lock shared; everything that touches the maps takes it exclusively.
//!
//! Batch writes hold the shared lock until the key-value engine returns, so a
//! concurrent delete or rename waits for them. Observers run inside that
//! window: they may read through the engine (shared acquisitions are
//! recursive) but must not create, delete, rename or (un)register tables from
//! the callback.

use std::collections::HashMap;
use std::sync::Arc;

use objectstore_core::{
    Entry, FieldMap, FieldValue, IterationCursor, KvEngine, KvStore, KvStoreManager,
    KvStoreObserver, ObjectStoreError, ObserverMode, Pragma, Result,
};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;

/// Observers are installed for writes made on this device.
const OBSERVER_MODE: ObserverMode = ObserverMode::Native;

/// Observers see every field of the table.
const OBSERVE_ALL_FIELDS: &[u8] = &[];

#[derive(Default)]
struct EngineState {
    manager: Option<Arc<dyn KvStoreManager>>,
    tables: HashMap<String, Arc<dyn KvStore>>,
    observers: HashMap<String, Arc<dyn KvStoreObserver>>,
}

impl EngineState {
    fn manager(&self) -> Result<&Arc<dyn KvStoreManager>> {
        self.manager.as_ref().ok_or(ObjectStoreError::NotInitialized)
    }

    fn table(&self, key: &str) -> Result<&Arc<dyn KvStore>> {
        self.manager()?;
        self.tables.get(key).ok_or_else(|| {
            debug!(key, "table does not exist");
            ObjectStoreError::NotFound(format!("table {key}"))
        })
    }

    /// First registration wins; a second one for the same key is a no-op.
    fn register(&mut self, key: &str, observer: Arc<dyn KvStoreObserver>) -> Result<()> {
        let table = self.table(key)?;
        if self.observers.contains_key(key) {
            info!(key, "observer already registered");
            return Ok(());
        }
        table
            .register_observer(OBSERVE_ALL_FIELDS, OBSERVER_MODE, Arc::clone(&observer))
            .map_err(|status| {
                error!(key, %status, "failed to register observer");
                ObjectStoreError::RegisterFailure {
                    key: key.to_string(),
                    status,
                }
            })?;
        self.observers.insert(key.to_string(), observer);
        Ok(())
    }

    fn unregister(&mut self, key: &str) -> Result<Arc<dyn KvStoreObserver>> {
        let table = self.table(key)?;
        let observer = self.observers.get(key).cloned().ok_or_else(|| {
            error!(key, "no observer to unregister");
            ObjectStoreError::NoObserver(key.to_string())
        })?;
        table.unregister_observer(&observer).map_err(|status| {
            error!(key, %status, "failed to unregister observer");
            ObjectStoreError::UnregisterFailure {
                key: key.to_string(),
                status,
            }
        })?;
        self.observers.remove(key);
        Ok(observer)
    }
}

/// One backing table per session key, plus at most one observer per table.
///
/// Every operation fails with [`ObjectStoreError::NotInitialized`] until
/// [`open`](Self::open) succeeds.
pub struct TableEngine {
    config: StoreConfig,
    kv: Arc<dyn KvEngine>,
    state: RwLock<EngineState>,
}

impl TableEngine {
    /// Creates a closed engine over `kv`.
    #[must_use]
    pub fn new(config: StoreConfig, kv: Arc<dyn KvEngine>) -> Self {
        Self {
            config,
            kv,
            state: RwLock::new(EngineState::default()),
        }
    }

    /// Configuration the engine was created with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Connects to the key-value engine. Succeeds immediately if already open.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::EngineFailure`] if the connection cannot be
    /// established.
    pub fn open(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.manager.is_some() {
            info!("storage engine already open");
            return Ok(());
        }
        let manager = self
            .kv
            .open(&self.config.app_id, &self.config.user_id)
            .map_err(|status| {
                error!(app_id = %self.config.app_id, %status, "failed to open storage engine");
                ObjectStoreError::EngineFailure {
                    key: self.config.app_id.clone(),
                    status,
                }
            })?;
        state.manager = Some(manager);
        info!(
            app_id = %self.config.app_id,
            user_id = %self.config.user_id,
            "storage engine opened"
        );
        Ok(())
    }

    /// Releases every table and observer, then the connection.
    ///
    /// Idempotent. Backend failures while releasing individual tables are
    /// logged and do not stop the close.
    ///
    /// # Errors
    ///
    /// Currently always succeeds.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        let Some(manager) = state.manager.take() else {
            info!("storage engine already closed");
            return Ok(());
        };
        let observers = std::mem::take(&mut state.observers);
        for (key, table) in state.tables.drain() {
            if let Some(observer) = observers.get(&key) {
                if let Err(status) = table.unregister_observer(observer) {
                    warn!(key, %status, "failed to unregister observer during close");
                }
            }
            if let Err(status) = manager.close_kv_store(&table) {
                warn!(key, %status, "failed to close table during close");
            }
        }
        info!("storage engine closed");
        Ok(())
    }

    /// Whether [`open`](Self::open) has succeeded and no close followed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.read_recursive().manager.is_some()
    }

    /// Opens the backing table for `key`. Succeeds without change if it exists.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NotInitialized`] if the engine is not open
    /// - [`ObjectStoreError::AlreadyExists`] if the backing table opened under
    ///   `key` has been renamed to another key and is still open
    /// - [`ObjectStoreError::EngineFailure`] if the table cannot be opened or
    ///   automatic replication cannot be enabled
    pub fn create_table(&self, key: &str) -> Result<()> {
        let mut state = self.state.write();
        let manager = Arc::clone(state.manager()?);
        if state.tables.contains_key(key) {
            info!(key, "table already created");
            return Ok(());
        }
        if let Some((holder, _)) = state.tables.iter().find(|(_, t)| t.store_id() == key) {
            error!(key, holder = %holder, "backing table was renamed and is still open");
            return Err(ObjectStoreError::AlreadyExists(key.to_string()));
        }
        let table = manager
            .get_kv_store(key, self.config.table_options)
            .map_err(|status| {
                error!(key, %status, "failed to open table");
                ObjectStoreError::EngineFailure {
                    key: key.to_string(),
                    status,
                }
            })?;
        if self.config.auto_sync {
            if let Err(status) = table.pragma(Pragma::AutoSync(true)) {
                error!(key, %status, "failed to enable auto sync");
                if let Err(close_status) = manager.close_kv_store(&table) {
                    warn!(key, status = %close_status, "failed to close table after pragma failure");
                }
                return Err(ObjectStoreError::EngineFailure {
                    key: key.to_string(),
                    status,
                });
            }
        }
        state.tables.insert(key.to_string(), table);
        debug!(key, "table created");
        Ok(())
    }

    /// Returns every field/value pair of the table for `key`, in no particular order.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NotFound`] if no table exists for `key`
    /// - [`ObjectStoreError::ReadFailure`] if the scan cannot complete
    pub fn get_table(&self, key: &str) -> Result<FieldMap> {
        let state = self.state.read_recursive();
        let table = state.table(key)?;
        let page_size = self.config.scan_page_size.max(1);
        let mut result = FieldMap::new();
        let mut cursor = IterationCursor::start();
        loop {
            let page = table
                .get_entries(OBSERVE_ALL_FIELDS, &cursor, page_size)
                .map_err(|status| {
                    error!(key, %status, "failed to scan table");
                    ObjectStoreError::ReadFailure {
                        key: key.to_string(),
                        status,
                    }
                })?;
            let exhausted = page.items.is_empty();
            result.extend(page.items.into_iter().map(|e| (e.key, e.value)));
            if page.next_cursor.finished || exhausted {
                break;
            }
            cursor = page.next_cursor;
        }
        Ok(result)
    }

    /// Upserts `items` into the table for `key` with one batch call.
    ///
    /// The shared lock is held across the engine call, so the table cannot be
    /// closed or moved while the batch is applied.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NotFound`] if no table exists for `key`
    /// - [`ObjectStoreError::Backend`] with the engine status if the batch fails
    pub fn update_items(&self, key: &str, items: &FieldMap) -> Result<()> {
        let state = self.state.read_recursive();
        let table = state.table(key)?;
        let entries: Vec<Entry> = items
            .iter()
            .map(|(field, value)| Entry::new(field.clone(), value.clone()))
            .collect();
        table.put_batch(entries).map_err(|status| {
            error!(key, %status, "batch put failed");
            ObjectStoreError::Backend(status)
        })
    }

    /// Closes and forgets the table for `key`, along with its observer.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NotFound`] if no table exists for `key`
    /// - [`ObjectStoreError::CloseFailure`] if the engine refuses to close it
    pub fn delete_table(&self, key: &str) -> Result<()> {
        let mut state = self.state.write();
        let manager = Arc::clone(state.manager()?);
        let table = Arc::clone(state.table(key)?);
        if let Some(observer) = state.observers.get(key).cloned() {
            match table.unregister_observer(&observer) {
                Ok(()) => {
                    state.observers.remove(key);
                }
                Err(status) => warn!(key, %status, "failed to unregister observer before delete"),
            }
        }
        manager.close_kv_store(&table).map_err(|status| {
            error!(key, %status, "failed to close table");
            ObjectStoreError::CloseFailure {
                key: key.to_string(),
                status,
            }
        })?;
        state.tables.remove(key);
        state.observers.remove(key);
        debug!(key, "table deleted");
        Ok(())
    }

    /// Point read of `field` in the table for `key`.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NotFound`] if no table exists for `key`
    /// - [`ObjectStoreError::Backend`] with the engine status if the read fails
    pub fn get_item(&self, key: &str, field: &[u8]) -> Result<FieldValue> {
        let state = self.state.read_recursive();
        let table = state.table(key)?;
        table.get(field).map_err(|status| {
            error!(
                key,
                field = %String::from_utf8_lossy(field),
                %status,
                "failed to read item"
            );
            ObjectStoreError::Backend(status)
        })
    }

    /// Installs `observer` on the table for `key`.
    ///
    /// If an observer is already registered for `key` the call succeeds and the
    /// existing observer stays in place.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NotFound`] if no table exists for `key`
    /// - [`ObjectStoreError::RegisterFailure`] if the engine rejects the observer
    pub fn register_observer(&self, key: &str, observer: Arc<dyn KvStoreObserver>) -> Result<()> {
        self.state.write().register(key, observer)
    }

    /// Removes the observer installed on the table for `key`.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NotFound`] if no table exists for `key`
    /// - [`ObjectStoreError::NoObserver`] if none is registered
    /// - [`ObjectStoreError::UnregisterFailure`] if the engine call fails
    pub fn unregister_observer(&self, key: &str) -> Result<()> {
        self.state.write().unregister(key).map(|_| ())
    }

    /// Moves the table for `old_key` to `new_key` without copying data.
    ///
    /// An observer registered under `old_key` is reinstalled under `new_key`
    /// with the same instance. Both steps happen under one exclusive lock.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NotFound`] if no table exists for `old_key`
    /// - [`ObjectStoreError::AlreadyExists`] if a table exists for `new_key`
    /// - [`ObjectStoreError::RegisterFailure`] if the observer cannot be
    ///   reinstalled; the table has moved but is no longer watched
    pub fn rename_table(&self, old_key: &str, new_key: &str) -> Result<()> {
        let mut state = self.state.write();
        state.table(old_key)?;
        if old_key == new_key {
            return Ok(());
        }
        if state.tables.contains_key(new_key) {
            error!(old_key, new_key, "rename target already exists");
            return Err(ObjectStoreError::AlreadyExists(new_key.to_string()));
        }
        let Some(table) = state.tables.remove(old_key) else {
            return Err(ObjectStoreError::NotFound(format!("table {old_key}")));
        };
        state.tables.insert(new_key.to_string(), Arc::clone(&table));

        if let Some(observer) = state.observers.remove(old_key) {
            if let Err(status) = table.unregister_observer(&observer) {
                warn!(old_key, %status, "failed to unregister observer under old key");
            }
            state.register(new_key, observer)?;
        }
        info!(old_key, new_key, "table renamed");
        Ok(())
    }

    /// Backing table for `key`.
    ///
    /// # Errors
    ///
    /// [`ObjectStoreError::NotInitialized`] or [`ObjectStoreError::NotFound`].
    pub fn table(&self, key: &str) -> Result<Arc<dyn KvStore>> {
        self.state.read_recursive().table(key).map(Arc::clone)
    }

    /// Observer registered for `key`.
    ///
    /// # Errors
    ///
    /// - [`ObjectStoreError::NotFound`] if no table exists for `key`
    /// - [`ObjectStoreError::NoObserver`] if none is registered
    pub fn observer(&self, key: &str) -> Result<Arc<dyn KvStoreObserver>> {
        let state = self.state.read_recursive();
        state.table(key)?;
        state
            .observers
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NoObserver(key.to_string()))
    }

    /// Whether an observer is registered for `key`.
    #[must_use]
    pub fn has_observer(&self, key: &str) -> bool {
        self.state.read_recursive().observers.contains_key(key)
    }

    /// Whether a table exists for `key`.
    #[must_use]
    pub fn contains_table(&self, key: &str) -> bool {
        self.state.read_recursive().tables.contains_key(key)
    }

    /// Number of open tables.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.state.read_recursive().tables.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use objectstore_core::{ChangedData, DbStatus, KvStoreObserver};
    use parking_lot::Mutex;
    use proptest::prelude::*;

    use super::*;
    use crate::storage::engines::{FaultPoint, MemoryKvEngine};
    use crate::storage::same_observer;
    use crate::test_support::{field_map, init_tracing, CountingObserver};

    fn engine_with(config: StoreConfig) -> (Arc<MemoryKvEngine>, TableEngine) {
        init_tracing();
        let kv = Arc::new(MemoryKvEngine::default());
        let engine = TableEngine::new(config, kv.clone());
        engine.open().unwrap();
        (kv, engine)
    }

    fn open_engine() -> (Arc<MemoryKvEngine>, TableEngine) {
        engine_with(StoreConfig::default())
    }

    fn backend_store_count(kv: &MemoryKvEngine) -> usize {
        kv.manager("objectstore", "user0").unwrap().store_count()
    }

    fn observer() -> (Arc<CountingObserver>, Arc<dyn KvStoreObserver>) {
        let counting = Arc::new(CountingObserver::default());
        let dyn_observer: Arc<dyn KvStoreObserver> = Arc::clone(&counting) as _;
        (counting, dyn_observer)
    }

    #[test]
    fn every_operation_requires_open() {
        let engine = TableEngine::new(StoreConfig::default(), Arc::new(MemoryKvEngine::default()));
        let (_, obs) = observer();

        assert_eq!(engine.create_table("s1"), Err(ObjectStoreError::NotInitialized));
        assert_eq!(engine.get_table("s1"), Err(ObjectStoreError::NotInitialized));
        assert_eq!(
            engine.update_items("s1", &FieldMap::new()),
            Err(ObjectStoreError::NotInitialized)
        );
        assert_eq!(engine.delete_table("s1"), Err(ObjectStoreError::NotInitialized));
        assert_eq!(engine.get_item("s1", b"f"), Err(ObjectStoreError::NotInitialized));
        assert_eq!(
            engine.register_observer("s1", obs).err(),
            Some(ObjectStoreError::NotInitialized)
        );
        assert_eq!(
            engine.unregister_observer("s1"),
            Err(ObjectStoreError::NotInitialized)
        );
        assert_eq!(
            engine.rename_table("s1", "s2"),
            Err(ObjectStoreError::NotInitialized)
        );
    }

    #[test]
    fn open_and_close_are_idempotent() {
        let (_, engine) = open_engine();
        assert_eq!(engine.config().app_id, "objectstore");
        engine.open().unwrap();
        assert!(engine.is_open());
        engine.close().unwrap();
        engine.close().unwrap();
        assert!(!engine.is_open());
        assert_eq!(engine.create_table("s1"), Err(ObjectStoreError::NotInitialized));
    }

    #[test]
    fn open_failure_is_engine_failure() {
        let kv = Arc::new(MemoryKvEngine::default());
        kv.faults().fail_next(FaultPoint::Open);
        let engine = TableEngine::new(StoreConfig::default(), kv);
        assert!(matches!(
            engine.open(),
            Err(ObjectStoreError::EngineFailure { .. })
        ));
        assert!(!engine.is_open());
        engine.open().unwrap();
    }

    #[test]
    fn create_table_twice_yields_one_table() {
        let (kv, engine) = open_engine();
        engine.create_table("s1").unwrap();
        engine.create_table("s1").unwrap();
        assert_eq!(engine.table_count(), 1);
        assert_eq!(backend_store_count(&kv), 1);
    }

    #[test]
    fn create_table_enables_auto_sync() {
        let (kv, engine) = open_engine();
        engine.create_table("s1").unwrap();
        let store = kv
            .manager("objectstore", "user0")
            .unwrap()
            .store("s1")
            .unwrap();
        assert!(store.auto_sync());
    }

    #[test]
    fn create_table_backend_failure_is_engine_failure() {
        let (kv, engine) = open_engine();
        kv.faults().fail_next(FaultPoint::GetKvStore);
        assert!(matches!(
            engine.create_table("s1"),
            Err(ObjectStoreError::EngineFailure { .. })
        ));
        assert!(!engine.contains_table("s1"));
    }

    #[test]
    fn create_table_pragma_failure_releases_table() {
        let (kv, engine) = open_engine();
        kv.faults().fail_next(FaultPoint::Pragma);
        assert!(matches!(
            engine.create_table("s1"),
            Err(ObjectStoreError::EngineFailure { .. })
        ));
        assert_eq!(engine.table_count(), 0);
        assert_eq!(backend_store_count(&kv), 0);
        engine.create_table("s1").unwrap();
    }

    #[test]
    fn missing_tables_are_not_found() {
        let (_, engine) = open_engine();
        assert!(engine.get_table("nope").unwrap_err().is_not_found());
        assert!(engine.delete_table("nope").unwrap_err().is_not_found());
        assert!(engine
            .update_items("nope", &FieldMap::new())
            .unwrap_err()
            .is_not_found());
        assert!(engine.get_item("nope", b"f").unwrap_err().is_not_found());
    }

    #[test]
    fn update_then_get_table_returns_snapshot() {
        let (_, engine) = open_engine();
        engine.create_table("s1").unwrap();
        let items = field_map(&[("name", "alice"), ("age", "7")]);
        engine.update_items("s1", &items).unwrap();
        assert_eq!(engine.get_table("s1").unwrap(), items);
        assert_eq!(engine.get_item("s1", b"name").unwrap(), b"alice".to_vec());
    }

    #[test]
    fn get_table_reads_across_pages() {
        let (_, engine) = engine_with(StoreConfig {
            scan_page_size: 2,
            ..StoreConfig::default()
        });
        engine.create_table("s1").unwrap();
        let items = field_map(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")]);
        engine.update_items("s1", &items).unwrap();
        assert_eq!(engine.get_table("s1").unwrap(), items);
    }

    #[test]
    fn get_table_scan_failure_is_read_failure() {
        let (kv, engine) = open_engine();
        engine.create_table("s1").unwrap();
        kv.faults().fail_next(FaultPoint::GetEntries);
        assert!(matches!(
            engine.get_table("s1"),
            Err(ObjectStoreError::ReadFailure { .. })
        ));
    }

    #[test]
    fn get_item_passes_backend_status_through() {
        let (_, engine) = open_engine();
        engine.create_table("s1").unwrap();
        let err = engine.get_item("s1", b"missing").unwrap_err();
        assert_eq!(err, ObjectStoreError::Backend(DbStatus::NotFound));
        assert_eq!(err.code(), DbStatus::NotFound.code());
    }

    #[test]
    fn get_item_passes_engine_failure_through() {
        let (kv, engine) = open_engine();
        engine.create_table("s1").unwrap();
        engine.update_items("s1", &field_map(&[("a", "1")])).unwrap();
        kv.faults().fail_next(FaultPoint::Get);
        let err = engine.get_item("s1", b"a").unwrap_err();
        assert_eq!(err, ObjectStoreError::Backend(DbStatus::DbError));
        assert_eq!(err.code(), DbStatus::DbError.code());
        assert_eq!(engine.get_item("s1", b"a").unwrap(), b"1".to_vec());
    }

    #[test]
    fn update_racing_delete_never_writes_to_closed_table() {
        let (_, engine) = open_engine();
        let items = field_map(&[("a", "1")]);
        for _ in 0..200 {
            engine.create_table("s1").unwrap();
            std::thread::scope(|scope| {
                let writer = scope.spawn(|| engine.update_items("s1", &items));
                let deleter = scope.spawn(|| engine.delete_table("s1"));
                deleter.join().unwrap().unwrap();
                if let Err(err) = writer.join().unwrap() {
                    assert!(err.is_not_found(), "unexpected write failure: {err}");
                }
            });
        }
    }

    struct ReadBackObserver {
        engine: Mutex<Option<Arc<TableEngine>>>,
        seen: Mutex<Option<Result<FieldMap>>>,
    }

    impl KvStoreObserver for ReadBackObserver {
        fn on_change(&self, _data: &ChangedData) {
            let engine = self.engine.lock().clone();
            if let Some(engine) = engine {
                *self.seen.lock() = Some(engine.get_table("s1"));
            }
        }
    }

    #[test]
    fn observer_can_read_table_during_batch() {
        let (_, engine) = open_engine();
        let engine = Arc::new(engine);
        engine.create_table("s1").unwrap();
        let observer = Arc::new(ReadBackObserver {
            engine: Mutex::new(Some(Arc::clone(&engine))),
            seen: Mutex::new(None),
        });
        engine.register_observer("s1", observer.clone()).unwrap();

        engine.update_items("s1", &field_map(&[("a", "1")])).unwrap();

        *observer.engine.lock() = None;
        assert_eq!(observer.seen.lock().take(), Some(Ok(field_map(&[("a", "1")]))));
    }

    #[test]
    fn update_items_failure_is_backend_status() {
        let (kv, engine) = open_engine();
        engine.create_table("s1").unwrap();
        kv.faults().fail_next(FaultPoint::PutBatch);
        assert_eq!(
            engine.update_items("s1", &field_map(&[("a", "1")])),
            Err(ObjectStoreError::Backend(DbStatus::DbError))
        );
    }

    #[test]
    fn delete_table_removes_table_and_observer() {
        let (kv, engine) = open_engine();
        engine.create_table("s1").unwrap();
        let (_, obs) = observer();
        engine.register_observer("s1", obs).unwrap();

        engine.delete_table("s1").unwrap();

        assert!(!engine.contains_table("s1"));
        assert!(!engine.has_observer("s1"));
        assert_eq!(backend_store_count(&kv), 0);
        assert!(engine.get_table("s1").unwrap_err().is_not_found());
    }

    #[test]
    fn delete_table_close_failure_keeps_table() {
        let (kv, engine) = open_engine();
        engine.create_table("s1").unwrap();
        kv.faults().fail_next(FaultPoint::CloseKvStore);
        assert!(matches!(
            engine.delete_table("s1"),
            Err(ObjectStoreError::CloseFailure { .. })
        ));
        assert!(engine.contains_table("s1"));
        engine.delete_table("s1").unwrap();
    }

    #[test]
    fn first_observer_registration_wins() {
        let (kv, engine) = open_engine();
        engine.create_table("s1").unwrap();
        let (_, first) = observer();
        let (_, second) = observer();

        engine.register_observer("s1", Arc::clone(&first)).unwrap();
        engine.register_observer("s1", second).unwrap();

        assert!(same_observer(&engine.observer("s1").unwrap(), &first));
        let store = kv
            .manager("objectstore", "user0")
            .unwrap()
            .store("s1")
            .unwrap();
        assert_eq!(store.observer_count(), 1);
    }

    #[test]
    fn register_observer_errors() {
        let (kv, engine) = open_engine();
        let (_, obs) = observer();
        assert!(engine
            .register_observer("s1", Arc::clone(&obs))
            .unwrap_err()
            .is_not_found());

        engine.create_table("s1").unwrap();
        kv.faults().fail_next(FaultPoint::RegisterObserver);
        assert!(matches!(
            engine.register_observer("s1", obs),
            Err(ObjectStoreError::RegisterFailure { .. })
        ));
        assert!(!engine.has_observer("s1"));
    }

    #[test]
    fn unregister_observer_errors_and_success() {
        let (kv, engine) = open_engine();
        assert!(engine.unregister_observer("s1").unwrap_err().is_not_found());

        engine.create_table("s1").unwrap();
        assert!(matches!(
            engine.unregister_observer("s1"),
            Err(ObjectStoreError::NoObserver(_))
        ));

        let (_, obs) = observer();
        engine.register_observer("s1", obs).unwrap();
        kv.faults().fail_next(FaultPoint::UnregisterObserver);
        assert!(matches!(
            engine.unregister_observer("s1"),
            Err(ObjectStoreError::UnregisterFailure { .. })
        ));
        assert!(engine.has_observer("s1"));

        engine.unregister_observer("s1").unwrap();
        assert!(!engine.has_observer("s1"));
    }

    #[test]
    fn observer_is_notified_of_batch_writes() {
        let (_, engine) = open_engine();
        engine.create_table("s1").unwrap();
        let (counting, obs) = observer();
        engine.register_observer("s1", obs).unwrap();

        engine
            .update_items("s1", &field_map(&[("a", "1"), ("b", "2")]))
            .unwrap();

        assert_eq!(counting.calls.load(Ordering::Relaxed), 1);
        assert_eq!(counting.last.lock().inserted.len(), 2);
    }

    #[test]
    fn rename_moves_table_without_copying() {
        let (kv, engine) = open_engine();
        engine.create_table("old").unwrap();
        engine
            .update_items("old", &field_map(&[("a", "1")]))
            .unwrap();

        engine.rename_table("old", "new").unwrap();

        assert!(engine.get_table("old").unwrap_err().is_not_found());
        assert_eq!(engine.get_table("new").unwrap(), field_map(&[("a", "1")]));
        assert_eq!(engine.table_count(), 1);
        assert_eq!(backend_store_count(&kv), 1);
        assert_eq!(engine.table("new").unwrap().store_id(), "old");
    }

    #[test]
    fn rename_transfers_the_same_observer() {
        let (_, engine) = open_engine();
        engine.create_table("old").unwrap();
        let (counting, obs) = observer();
        engine.register_observer("old", Arc::clone(&obs)).unwrap();

        engine.rename_table("old", "new").unwrap();

        assert!(!engine.has_observer("old"));
        assert!(engine.unregister_observer("old").unwrap_err().is_not_found());
        assert!(same_observer(&engine.observer("new").unwrap(), &obs));

        engine
            .update_items("new", &field_map(&[("a", "1")]))
            .unwrap();
        assert_eq!(counting.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn rename_errors() {
        let (_, engine) = open_engine();
        assert!(engine.rename_table("a", "b").unwrap_err().is_not_found());

        engine.create_table("a").unwrap();
        engine.create_table("b").unwrap();
        assert_eq!(
            engine.rename_table("a", "b"),
            Err(ObjectStoreError::AlreadyExists("b".to_string()))
        );
        engine.rename_table("a", "a").unwrap();
        assert_eq!(engine.table_count(), 2);
    }

    #[test]
    fn renamed_backing_table_cannot_be_reopened_under_old_key() {
        let (kv, engine) = open_engine();
        engine.create_table("old").unwrap();
        engine.rename_table("old", "new").unwrap();

        assert_eq!(
            engine.create_table("old"),
            Err(ObjectStoreError::AlreadyExists("old".to_string()))
        );
        assert!(!engine.contains_table("old"));
        engine.update_items("new", &field_map(&[("a", "1")])).unwrap();

        engine.delete_table("new").unwrap();
        assert_eq!(backend_store_count(&kv), 0);

        engine.create_table("old").unwrap();
        assert_eq!(engine.get_table("old").unwrap(), FieldMap::new());
        engine.delete_table("old").unwrap();
        assert_eq!(engine.table_count(), 0);
    }

    #[test]
    fn rename_register_failure_leaves_table_moved_but_unwatched() {
        let (kv, engine) = open_engine();
        engine.create_table("old").unwrap();
        let (_, obs) = observer();
        engine.register_observer("old", obs).unwrap();

        kv.faults().fail_next(FaultPoint::RegisterObserver);
        assert!(matches!(
            engine.rename_table("old", "new"),
            Err(ObjectStoreError::RegisterFailure { .. })
        ));
        assert!(engine.contains_table("new"));
        assert!(!engine.contains_table("old"));
        assert!(!engine.has_observer("new"));
        assert!(!engine.has_observer("old"));
    }

    #[test]
    fn close_drains_all_tables() {
        let (kv, engine) = open_engine();
        engine.create_table("s1").unwrap();
        engine.create_table("s2").unwrap();
        let (_, obs) = observer();
        engine.register_observer("s1", obs).unwrap();

        engine.close().unwrap();
        assert_eq!(backend_store_count(&kv), 0);

        engine.open().unwrap();
        assert!(engine.get_table("s1").unwrap_err().is_not_found());
        assert!(engine.get_table("s2").unwrap_err().is_not_found());
        engine.create_table("fresh").unwrap();
        assert_eq!(engine.table_count(), 1);
    }

    #[test]
    fn concurrent_creates_yield_one_table_per_key() {
        let (kv, engine) = open_engine();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for i in 0..16 {
                        engine.create_table(&format!("s{i}")).unwrap();
                    }
                });
            }
        });
        assert_eq!(engine.table_count(), 16);
        assert_eq!(backend_store_count(&kv), 16);
    }

    proptest! {
        #[test]
        fn prop_create_table_is_idempotent(keys in proptest::collection::vec("[a-z]{1,4}", 1..32)) {
            let (_, engine) = open_engine();
            for key in &keys {
                prop_assert!(engine.create_table(key).is_ok());
            }
            let distinct: std::collections::HashSet<&String> = keys.iter().collect();
            prop_assert_eq!(engine.table_count(), distinct.len());
        }
    }
}
