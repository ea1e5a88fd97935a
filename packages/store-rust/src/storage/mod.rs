//! Storage layer of the object store.
//!
//! - [`TableEngine`]: one backing table per session key, batched field updates,
//!   and at most one change observer per table
//! - [`engines`]: implementations of the replicated key-value engine contract

use std::sync::Arc;

use objectstore_core::KvStoreObserver;

pub mod engines;
pub mod table_engine;

pub use table_engine::TableEngine;

/// Whether two observer handles point at the same observer instance.
///
/// Compares data addresses only; vtable pointers of the same type may differ
/// between codegen units.
#[must_use]
pub fn same_observer(a: &Arc<dyn KvStoreObserver>, b: &Arc<dyn KvStoreObserver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}
