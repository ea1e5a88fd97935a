//! Session-scoped distributed object store.
//!
//! Objects are named by a session id. Each session is backed by one table in a
//! replicated key-value engine, so peers opening the same session see the same
//! fields. Layers, bottom up:
//!
//! - [`storage::TableEngine`]: session key to table, plus one change observer per table
//! - [`object::ObjectCache`]: live handles, their watchers, and session changes
//! - [`ObjectStore`]: the process-wide facade
//! - [`binding::AsyncObjectStore`]: async adapter for host bindings

pub mod binding;
pub mod config;
pub mod object;
pub mod storage;
pub mod store;

pub use binding::{AsyncObjectStore, SESSION_ID_MAX_LEN};
pub use config::StoreConfig;
pub use object::{
    DistributedObject, FlatObject, ObjectCache, ObjectRef, ObjectWatcher, SESSION_ID_FIELD,
};
pub use storage::engines::{MemoryEngineConfig, MemoryKvEngine};
pub use storage::TableEngine;
pub use store::ObjectStore;

#[cfg(test)]
mod test_support;
