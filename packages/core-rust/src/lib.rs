//! Object store core: typed field values, status codes, and the replicated
//! key-value engine contract consumed by the storage engine.

pub mod codec;
pub mod error;
pub mod kv;
pub mod types;

pub use codec::{decode_value, encode_value};
pub use error::{status_of, DbStatus, ObjectStoreError, Result, SUCCESS};
pub use kv::{
    ChangeOrigin, ChangedData, FetchResult, IterationCursor, KvEngine, KvStore, KvStoreManager,
    KvStoreObserver, ObserverMode, Pragma, TableOptions,
};
pub use types::{Entry, Field, FieldMap, FieldValue, Value, ValueType};
