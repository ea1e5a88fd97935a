//! Routes table change sets to per-object watchers.

use std::collections::HashSet;
use std::sync::Arc;

use objectstore_core::{ChangedData, KvStoreObserver};
use tracing::{debug, warn};

use super::{DistributedObject, ObjectRef, SESSION_ID_FIELD};

/// Callback attached to one object handle.
pub trait ObjectWatcher: Send + Sync {
    /// `changed_fields` lists every field touched by one write, without the
    /// reserved session field. Never called with an empty list.
    fn on_changed(&self, session_id: &str, changed_fields: &[String]);
}

/// Table observer that forwards changes to an [`ObjectWatcher`].
///
/// The session id is read from the handle when the change arrives, so a
/// watcher keeps receiving notifications under the new id after a session
/// change.
pub struct WatcherBridge {
    object: ObjectRef,
    watcher: Arc<dyn ObjectWatcher>,
}

impl WatcherBridge {
    #[must_use]
    pub fn new(object: ObjectRef, watcher: Arc<dyn ObjectWatcher>) -> Self {
        Self { object, watcher }
    }
}

/// Field names touched by `data`, deduplicated in first-seen order.
fn changed_fields(data: &ChangedData) -> Vec<String> {
    let mut seen = HashSet::new();
    data.entries()
        .filter(|entry| entry.key != SESSION_ID_FIELD)
        .map(|entry| String::from_utf8_lossy(&entry.key).into_owned())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

impl KvStoreObserver for WatcherBridge {
    fn on_change(&self, data: &ChangedData) {
        let fields = changed_fields(data);
        if fields.is_empty() {
            return;
        }
        let session_id = match self.object.object_id() {
            Ok(id) => id,
            Err(err) => {
                warn!(handle = %self.object.handle_id(), %err, "dropping change for unresolvable object");
                return;
            }
        };
        debug!(session_id, count = fields.len(), "forwarding change to watcher");
        self.watcher.on_changed(&session_id, &fields);
    }
}
