//! In-memory [`KvEngine`] implementation backed by [`DashMap`].
//!
//! Stands in for the replicated key-value engine in tests, embedded use, and
//! single-device deployments. Tables live in a [`DashMap`] of rows; writes
//! made through [`KvStore::put_batch`] notify `Native` observers, while
//! [`MemoryKvStore::apply_remote`] simulates a batch arriving from a peer
//! device and notifies `Foreign` observers.
//!
//! Every engine call can be made to fail once through [`FaultInjector`], which
//! is how the storage engine's backend failure paths are exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use objectstore_core::{
    ChangeOrigin, ChangedData, DbStatus, Entry, FetchResult, FieldValue, IterationCursor,
    KvEngine, KvStore, KvStoreManager, KvStoreObserver, ObserverMode, Pragma, TableOptions,
};
use parking_lot::{Mutex, RwLock};

use crate::storage::same_observer;

/// Configuration for the in-memory engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngineConfig {
    /// Maximum number of open tables per manager. 0 = unlimited.
    pub max_tables: usize,
}

/// Engine call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Open,
    GetKvStore,
    CloseKvStore,
    Pragma,
    Get,
    PutBatch,
    GetEntries,
    RegisterObserver,
    UnregisterObserver,
}

/// Queue of one-shot failures shared by an engine and everything it opens.
#[derive(Debug, Default)]
pub struct FaultInjector {
    pending: Mutex<HashMap<FaultPoint, usize>>,
}

impl FaultInjector {
    /// Makes the next call at `point` fail with [`DbStatus::DbError`].
    pub fn fail_next(&self, point: FaultPoint) {
        *self.pending.lock().entry(point).or_insert(0) += 1;
    }

    /// Consumes a pending failure for `point`, if any.
    fn check(&self, point: FaultPoint) -> Result<(), DbStatus> {
        let mut pending = self.pending.lock();
        match pending.get_mut(&point) {
            Some(count) if *count > 0 => {
                *count -= 1;
                Err(DbStatus::DbError)
            }
            _ => Ok(()),
        }
    }
}

/// Decodes a cursor's opaque state into a `u64` offset.
///
/// Empty state (from `IterationCursor::start()`) is treated as offset 0.
fn decode_cursor_offset(cursor: &IterationCursor) -> u64 {
    if cursor.state.is_empty() {
        0
    } else {
        let mut buf = [0u8; 8];
        let len = cursor.state.len().min(8);
        buf[..len].copy_from_slice(&cursor.state[..len]);
        u64::from_le_bytes(buf)
    }
}

/// Encodes an offset into cursor state bytes (little-endian `u64`).
fn encode_cursor_offset(offset: u64) -> Vec<u8> {
    offset.to_le_bytes().to_vec()
}

struct Registration {
    key_prefix: Vec<u8>,
    mode: ObserverMode,
    observer: Arc<dyn KvStoreObserver>,
}

/// One in-memory table.
pub struct MemoryKvStore {
    store_id: String,
    options: TableOptions,
    rows: DashMap<Vec<u8>, FieldValue>,
    observers: RwLock<Vec<Registration>>,
    auto_sync: AtomicBool,
    closed: AtomicBool,
    faults: Arc<FaultInjector>,
}

impl MemoryKvStore {
    fn new(store_id: &str, options: TableOptions, faults: Arc<FaultInjector>) -> Self {
        Self {
            store_id: store_id.to_string(),
            options,
            rows: DashMap::new(),
            observers: RwLock::new(Vec::new()),
            auto_sync: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            faults,
        }
    }

    /// Applies a batch received from a peer device and notifies `Foreign` observers.
    ///
    /// # Errors
    ///
    /// Returns [`DbStatus::AlreadyClosed`] if the table has been closed.
    pub fn apply_remote(&self, entries: Vec<Entry>) -> Result<(), DbStatus> {
        self.ensure_open()?;
        let data = self.apply(entries);
        self.notify(ChangeOrigin::Remote, &data);
        Ok(())
    }

    /// Whether automatic replication has been enabled through a pragma.
    #[must_use]
    pub fn auto_sync(&self) -> bool {
        self.auto_sync.load(Ordering::Acquire)
    }

    /// Number of rows in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of installed observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Options the table was opened with.
    #[must_use]
    pub fn options(&self) -> TableOptions {
        self.options
    }

    fn ensure_open(&self) -> Result<(), DbStatus> {
        if self.closed.load(Ordering::Acquire) {
            Err(DbStatus::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    fn apply(&self, entries: Vec<Entry>) -> ChangedData {
        let mut data = ChangedData::default();
        for entry in entries {
            match self.rows.insert(entry.key.clone(), entry.value.clone()) {
                Some(_) => data.updated.push(entry),
                None => data.inserted.push(entry),
            }
        }
        data
    }

    /// Delivers `data` to matching observers after the registration lock is released.
    fn notify(&self, origin: ChangeOrigin, data: &ChangedData) {
        if data.is_empty() {
            return;
        }
        let targets: Vec<(Vec<u8>, Arc<dyn KvStoreObserver>)> = self
            .observers
            .read()
            .iter()
            .filter(|r| r.mode.accepts(origin))
            .map(|r| (r.key_prefix.clone(), Arc::clone(&r.observer)))
            .collect();

        for (prefix, observer) in targets {
            if prefix.is_empty() {
                observer.on_change(data);
                continue;
            }
            let keep = |entries: &[Entry]| -> Vec<Entry> {
                entries
                    .iter()
                    .filter(|e| e.key.starts_with(&prefix))
                    .cloned()
                    .collect()
            };
            let filtered = ChangedData {
                inserted: keep(&data.inserted),
                updated: keep(&data.updated),
                deleted: keep(&data.deleted),
            };
            if !filtered.is_empty() {
                observer.on_change(&filtered);
            }
        }
    }

    /// Returns a key-sorted snapshot so offset cursors stay stable between pages.
    fn sorted_entries(&self, prefix: &[u8]) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self
            .rows
            .iter()
            .filter(|row| row.key().starts_with(prefix))
            .map(|row| Entry::new(row.key().clone(), row.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.observers.write().clear();
    }
}

impl KvStore for MemoryKvStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    fn pragma(&self, pragma: Pragma) -> Result<(), DbStatus> {
        self.faults.check(FaultPoint::Pragma)?;
        self.ensure_open()?;
        match pragma {
            Pragma::AutoSync(enabled) => self.auto_sync.store(enabled, Ordering::Release),
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<FieldValue, DbStatus> {
        self.faults.check(FaultPoint::Get)?;
        self.ensure_open()?;
        self.rows
            .get(key)
            .map(|v| v.value().clone())
            .ok_or(DbStatus::NotFound)
    }

    fn put_batch(&self, entries: Vec<Entry>) -> Result<(), DbStatus> {
        self.faults.check(FaultPoint::PutBatch)?;
        self.ensure_open()?;
        let data = self.apply(entries);
        self.notify(ChangeOrigin::Local, &data);
        Ok(())
    }

    fn get_entries(
        &self,
        prefix: &[u8],
        cursor: &IterationCursor,
        size: usize,
    ) -> Result<FetchResult<Entry>, DbStatus> {
        self.faults.check(FaultPoint::GetEntries)?;
        self.ensure_open()?;
        if size == 0 {
            return Err(DbStatus::InvalidArgs);
        }
        let snapshot = self.sorted_entries(prefix);
        let total = snapshot.len();
        // Cursor offsets are always small (bounded by table size), so truncation is safe.
        #[allow(clippy::cast_possible_truncation)]
        let offset = decode_cursor_offset(cursor) as usize;

        let items: Vec<Entry> = snapshot.into_iter().skip(offset).take(size).collect();

        let new_offset = offset + items.len();
        let finished = new_offset >= total;

        Ok(FetchResult {
            items,
            next_cursor: IterationCursor {
                state: encode_cursor_offset(new_offset as u64),
                finished,
            },
        })
    }

    fn register_observer(
        &self,
        key_prefix: &[u8],
        mode: ObserverMode,
        observer: Arc<dyn KvStoreObserver>,
    ) -> Result<(), DbStatus> {
        self.faults.check(FaultPoint::RegisterObserver)?;
        self.ensure_open()?;
        let mut observers = self.observers.write();
        if observers
            .iter()
            .any(|r| same_observer(&r.observer, &observer))
        {
            return Err(DbStatus::InvalidArgs);
        }
        observers.push(Registration {
            key_prefix: key_prefix.to_vec(),
            mode,
            observer,
        });
        Ok(())
    }

    fn unregister_observer(&self, observer: &Arc<dyn KvStoreObserver>) -> Result<(), DbStatus> {
        self.faults.check(FaultPoint::UnregisterObserver)?;
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|r| !same_observer(&r.observer, observer));
        if observers.len() == before {
            return Err(DbStatus::NotFound);
        }
        Ok(())
    }
}

/// Table manager for one app/user identity.
pub struct MemoryKvManager {
    stores: DashMap<String, Arc<MemoryKvStore>>,
    config: MemoryEngineConfig,
    faults: Arc<FaultInjector>,
}

impl MemoryKvManager {
    /// Looks up an open table by id, with its concrete type.
    #[must_use]
    pub fn store(&self, store_id: &str) -> Option<Arc<MemoryKvStore>> {
        self.stores.get(store_id).map(|s| Arc::clone(s.value()))
    }

    /// Number of tables currently held by the manager.
    #[must_use]
    pub fn store_count(&self) -> usize {
        self.stores.len()
    }
}

impl KvStoreManager for MemoryKvManager {
    fn get_kv_store(
        &self,
        store_id: &str,
        options: TableOptions,
    ) -> Result<Arc<dyn KvStore>, DbStatus> {
        self.faults.check(FaultPoint::GetKvStore)?;
        if store_id.is_empty() {
            return Err(DbStatus::InvalidArgs);
        }
        if let Some(existing) = self.stores.get(store_id) {
            return Ok(Arc::clone(existing.value()) as Arc<dyn KvStore>);
        }
        if !options.create_if_necessary {
            return Err(DbStatus::NotFound);
        }
        // Rows live in process memory; there is no cipher to apply.
        if options.encrypted {
            return Err(DbStatus::NotSupported);
        }
        if self.config.max_tables > 0 && self.stores.len() >= self.config.max_tables {
            return Err(DbStatus::OverMaxLimits);
        }
        let store = Arc::new(MemoryKvStore::new(
            store_id,
            options,
            Arc::clone(&self.faults),
        ));
        self.stores
            .insert(store_id.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn close_kv_store(&self, store: &Arc<dyn KvStore>) -> Result<(), DbStatus> {
        self.faults.check(FaultPoint::CloseKvStore)?;
        let id = store.store_id();
        let Some(existing) = self.store(id) else {
            return Err(DbStatus::NotFound);
        };
        existing.close();
        // Persistent tables keep their rows for the next open; in-memory ones are dropped.
        if existing.options.in_memory {
            self.stores.remove(id);
        } else {
            self.stores.insert(
                id.to_string(),
                Arc::new(MemoryKvStore {
                    store_id: id.to_string(),
                    options: existing.options,
                    rows: existing.rows.clone(),
                    observers: RwLock::new(Vec::new()),
                    auto_sync: AtomicBool::new(false),
                    closed: AtomicBool::new(false),
                    faults: Arc::clone(&self.faults),
                }),
            );
        }
        Ok(())
    }
}

/// In-memory replicated key-value engine.
///
/// Opening the same app/user pair twice returns the same manager, so
/// persistent tables survive a close/open cycle of the storage engine.
#[derive(Default)]
pub struct MemoryKvEngine {
    managers: DashMap<(String, String), Arc<MemoryKvManager>>,
    config: MemoryEngineConfig,
    faults: Arc<FaultInjector>,
}

impl MemoryKvEngine {
    /// Creates an engine with the given configuration.
    #[must_use]
    pub fn new(config: MemoryEngineConfig) -> Self {
        Self {
            managers: DashMap::new(),
            config,
            faults: Arc::new(FaultInjector::default()),
        }
    }

    /// Fault injector shared by this engine and every table it opens.
    #[must_use]
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Manager for `app_id`/`user_id`, if it has been opened.
    #[must_use]
    pub fn manager(&self, app_id: &str, user_id: &str) -> Option<Arc<MemoryKvManager>> {
        self.managers
            .get(&(app_id.to_string(), user_id.to_string()))
            .map(|m| Arc::clone(m.value()))
    }
}

impl KvEngine for MemoryKvEngine {
    fn open(&self, app_id: &str, user_id: &str) -> Result<Arc<dyn KvStoreManager>, DbStatus> {
        self.faults.check(FaultPoint::Open)?;
        if app_id.is_empty() || user_id.is_empty() {
            return Err(DbStatus::InvalidArgs);
        }
        let manager = self
            .managers
            .entry((app_id.to_string(), user_id.to_string()))
            .or_insert_with(|| {
                Arc::new(MemoryKvManager {
                    stores: DashMap::new(),
                    config: self.config.clone(),
                    faults: Arc::clone(&self.faults),
                })
            })
            .clone();
        Ok(manager)
    }
}
