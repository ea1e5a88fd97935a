//! Shared doubles and helpers for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use objectstore_core::{ChangedData, FieldMap, KvStoreObserver, ObjectStoreError, Result, Value};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::object::{DistributedObject, ObjectWatcher};

/// Installs a test-writer subscriber once per process. `RUST_LOG` filters it.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds a field map from UTF-8 field/value pairs.
pub(crate) fn field_map(pairs: &[(&str, &str)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

/// Counts notifications and remembers the last change set.
#[derive(Default)]
pub(crate) struct CountingObserver {
    pub calls: AtomicUsize,
    pub last: Mutex<ChangedData>,
}

impl KvStoreObserver for CountingObserver {
    fn on_change(&self, data: &ChangedData) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        *self.last.lock() = data.clone();
    }
}

/// Records every watcher callback as `(session_id, sorted changed fields)`.
#[derive(Default)]
pub(crate) struct RecordingWatcher {
    pub events: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingWatcher {
    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn last(&self) -> Option<(String, Vec<String>)> {
        self.events.lock().last().cloned()
    }
}

impl ObjectWatcher for RecordingWatcher {
    fn on_changed(&self, session_id: &str, changed_fields: &[String]) {
        let mut fields = changed_fields.to_vec();
        fields.sort();
        self.events.lock().push((session_id.to_string(), fields));
    }
}

/// Handle whose session field is corrupt: every id lookup and field access fails.
pub(crate) struct UnresolvableObject {
    handle_id: Uuid,
}

impl Default for UnresolvableObject {
    fn default() -> Self {
        Self {
            handle_id: Uuid::new_v4(),
        }
    }
}

impl UnresolvableObject {
    fn corrupt() -> ObjectStoreError {
        ObjectStoreError::Codec("corrupt session field".to_string())
    }
}

impl DistributedObject for UnresolvableObject {
    fn handle_id(&self) -> Uuid {
        self.handle_id
    }

    fn object_id(&self) -> Result<String> {
        Err(Self::corrupt())
    }

    fn snapshot(&self) -> FieldMap {
        FieldMap::new()
    }

    fn put_value(&self, _field: &str, _value: &Value) -> Result<()> {
        Err(Self::corrupt())
    }

    fn get_value(&self, _field: &str) -> Result<Value> {
        Err(Self::corrupt())
    }

    fn rebind_session(&self, _session_id: &str) -> Result<()> {
        Err(Self::corrupt())
    }

    fn detach(&self) {}

    fn is_detached(&self) -> bool {
        false
    }
}
