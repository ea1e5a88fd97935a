//! `KvEngine` implementations.
//!
//! Provides concrete backends for the
//! [`KvEngine`](objectstore_core::KvEngine) contract. Currently includes
//! [`MemoryKvEngine`] for tests, embedding, and single-device use.

mod memory;

pub use memory::{
    FaultInjector, FaultPoint, MemoryEngineConfig, MemoryKvEngine, MemoryKvManager, MemoryKvStore,
};
