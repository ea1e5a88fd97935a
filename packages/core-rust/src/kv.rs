//! Contract with the replicated key-value engine.
//!
//! The object store never talks to devices or replication peers directly. It
//! consumes the engine through three object-safe traits:
//!
//! - [`KvEngine`]: entry point, opens a [`KvStoreManager`] for one app/user pair
//! - [`KvStoreManager`]: opens and closes per-session tables
//! - [`KvStore`]: one table; point reads, batch puts, paginated scans, observers
//!
//! Change notifications come back through [`KvStoreObserver`]. All calls are
//! synchronous and report failures as a [`DbStatus`].

use std::sync::Arc;

use crate::error::DbStatus;
use crate::types::{Entry, FieldValue};

/// Options for opening a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    /// Create the table if it does not exist yet.
    pub create_if_necessary: bool,
    /// Keep the table in memory only (no on-disk persistence).
    pub in_memory: bool,
    /// Encrypt the table at rest.
    pub encrypted: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            create_if_necessary: true,
            in_memory: true,
            encrypted: false,
        }
    }
}

/// Engine-level tuning applied to an open table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pragma {
    /// Push local writes to peer devices automatically.
    AutoSync(bool),
}

/// Which writes trigger an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverMode {
    /// Writes made on this device.
    Native,
    /// Writes received from peer devices through replication.
    Foreign,
}

/// Origin of a change delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

impl ObserverMode {
    /// Whether an observer registered with this mode is notified of `origin`.
    #[must_use]
    pub fn accepts(self, origin: ChangeOrigin) -> bool {
        matches!(
            (self, origin),
            (Self::Native, ChangeOrigin::Local) | (Self::Foreign, ChangeOrigin::Remote)
        )
    }
}

/// Entries touched by one write, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedData {
    pub inserted: Vec<Entry>,
    pub updated: Vec<Entry>,
    pub deleted: Vec<Entry>,
}

impl ChangedData {
    /// Returns `true` if no entry changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// All changed entries in insertion, update, deletion order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.inserted
            .iter()
            .chain(self.updated.iter())
            .chain(self.deleted.iter())
    }
}

/// Callback installed on a [`KvStore`].
///
/// Identity is the `Arc` allocation: unregistration matches by pointer, so the
/// same instance must be handed back to [`KvStore::unregister_observer`].
pub trait KvStoreObserver: Send + Sync {
    /// Called after a write matching the observer's mode has been applied.
    fn on_change(&self, data: &ChangedData);
}

/// Opaque cursor for resumable iteration over table entries.
///
/// Implementations encode their internal position in the `state` field.
/// Consumers should treat `state` as opaque and only check `finished`.
#[derive(Debug, Clone)]
pub struct IterationCursor {
    /// Opaque state for the engine to resume iteration.
    pub state: Vec<u8>,
    /// Whether iteration has completed (no more entries).
    pub finished: bool,
}

impl IterationCursor {
    /// Creates a cursor positioned at the beginning of the table.
    #[must_use]
    pub fn start() -> Self {
        Self {
            state: Vec::new(),
            finished: false,
        }
    }
}

/// Result of a cursor-based fetch.
#[derive(Debug)]
pub struct FetchResult<T> {
    /// The fetched items.
    pub items: Vec<T>,
    /// Updated cursor for the next fetch call.
    pub next_cursor: IterationCursor,
}

/// One open table of the key-value engine.
///
/// Used as `Arc<dyn KvStore>`.
pub trait KvStore: Send + Sync {
    /// Identifier the table was opened with.
    fn store_id(&self) -> &str;

    /// Applies an engine pragma.
    ///
    /// # Errors
    ///
    /// Returns the engine status if the pragma is rejected.
    fn pragma(&self, pragma: Pragma) -> Result<(), DbStatus>;

    /// Point read of a single field.
    ///
    /// # Errors
    ///
    /// Returns [`DbStatus::NotFound`] if the field is absent.
    fn get(&self, key: &[u8]) -> Result<FieldValue, DbStatus>;

    /// Upserts all entries in a single engine call.
    ///
    /// # Errors
    ///
    /// Returns the engine status if the batch is rejected.
    fn put_batch(&self, entries: Vec<Entry>) -> Result<(), DbStatus>;

    /// Fetches up to `size` entries whose key starts with `prefix`, starting at `cursor`.
    ///
    /// # Errors
    ///
    /// Returns the engine status if the scan cannot proceed.
    fn get_entries(
        &self,
        prefix: &[u8],
        cursor: &IterationCursor,
        size: usize,
    ) -> Result<FetchResult<Entry>, DbStatus>;

    /// Installs `observer` for changes to keys starting with `key_prefix`.
    ///
    /// # Errors
    ///
    /// Returns the engine status if the observer cannot be installed.
    fn register_observer(
        &self,
        key_prefix: &[u8],
        mode: ObserverMode,
        observer: Arc<dyn KvStoreObserver>,
    ) -> Result<(), DbStatus>;

    /// Removes a previously installed observer, matched by `Arc` identity.
    ///
    /// # Errors
    ///
    /// Returns [`DbStatus::NotFound`] if the observer is not installed.
    fn unregister_observer(&self, observer: &Arc<dyn KvStoreObserver>) -> Result<(), DbStatus>;
}

/// Opens and closes tables for one app/user identity.
pub trait KvStoreManager: Send + Sync {
    /// Opens (or creates) the table `store_id`.
    ///
    /// # Errors
    ///
    /// Returns the engine status if the table cannot be opened.
    fn get_kv_store(
        &self,
        store_id: &str,
        options: TableOptions,
    ) -> Result<Arc<dyn KvStore>, DbStatus>;

    /// Closes a table previously returned by [`get_kv_store`](Self::get_kv_store).
    ///
    /// # Errors
    ///
    /// Returns the engine status if the table cannot be closed.
    fn close_kv_store(&self, store: &Arc<dyn KvStore>) -> Result<(), DbStatus>;
}

/// Entry point of the replicated key-value engine.
pub trait KvEngine: Send + Sync {
    /// Connects as `user_id` of application `app_id`.
    ///
    /// # Errors
    ///
    /// Returns the engine status if the connection cannot be established.
    fn open(&self, app_id: &str, user_id: &str) -> Result<Arc<dyn KvStoreManager>, DbStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_observers_only_see_local_writes() {
        assert!(ObserverMode::Native.accepts(ChangeOrigin::Local));
        assert!(!ObserverMode::Native.accepts(ChangeOrigin::Remote));
        assert!(ObserverMode::Foreign.accepts(ChangeOrigin::Remote));
        assert!(!ObserverMode::Foreign.accepts(ChangeOrigin::Local));
    }

    #[test]
    fn changed_data_entries_chain_all_kinds() {
        let data = ChangedData {
            inserted: vec![Entry::new("a", "1")],
            updated: vec![Entry::new("b", "2")],
            deleted: vec![Entry::new("c", "3")],
        };
        let keys: Vec<&[u8]> = data.entries().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b", b"c"]);
        assert!(!data.is_empty());
        assert!(ChangedData::default().is_empty());
    }

    #[test]
    fn default_table_options_are_in_memory_and_unencrypted() {
        let options = TableOptions::default();
        assert!(options.create_if_necessary);
        assert!(options.in_memory);
        assert!(!options.encrypted);
    }

    #[test]
    fn cursor_start_is_unfinished() {
        let cursor = IterationCursor::start();
        assert!(cursor.state.is_empty());
        assert!(!cursor.finished);
    }

    /// Verifies `Arc<dyn KvStore>` compiles (object safety).
    #[test]
    fn kv_store_is_object_safe() {
        fn _assert_object_safe(_: &Arc<dyn KvStore>) {}
    }

    /// Verifies `Arc<dyn KvStoreObserver>` compiles (object safety).
    #[test]
    fn kv_store_observer_is_object_safe() {
        fn _assert_object_safe(_: &Arc<dyn KvStoreObserver>) {}
    }
}
