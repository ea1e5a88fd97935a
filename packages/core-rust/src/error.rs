//! Status codes and error types shared by the storage engine and the object store.
//!
//! Every public operation surfaces an [`ObjectStoreError`]. The binding layer
//! only sees small non-negative integers: [`SUCCESS`] (`0`) or the value of
//! [`ObjectStoreError::code`]. Backend failures that have no richer
//! classification are carried as [`ObjectStoreError::Backend`] and keep the
//! key-value engine's own status number.

use crate::types::ValueType;

/// Status code reported for a successful operation.
pub const SUCCESS: u32 = 0;

/// Result alias for object store operations.
pub type Result<T> = std::result::Result<T, ObjectStoreError>;

/// Status returned by the replicated key-value engine.
///
/// Codes are the engine's native numbering and are passed through to callers
/// unchanged when no store-level classification applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum DbStatus {
    #[error("database error")]
    DbError,
    #[error("busy")]
    Busy,
    #[error("not found")]
    NotFound,
    #[error("invalid arguments")]
    InvalidArgs,
    #[error("already closed")]
    AlreadyClosed,
    #[error("operation not supported")]
    NotSupported,
    #[error("over max limits")]
    OverMaxLimits,
}

impl DbStatus {
    /// Native status code of the key-value engine.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::DbError => 1001,
            Self::Busy => 1002,
            Self::NotFound => 1003,
            Self::InvalidArgs => 1004,
            Self::AlreadyClosed => 1005,
            Self::NotSupported => 1006,
            Self::OverMaxLimits => 1007,
        }
    }
}

/// Errors returned by the table engine, the object cache and the store facade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("storage engine is not initialized")]
    NotInitialized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("object is null")]
    NullObject,
    #[error("object store is null")]
    NullObjectStore,
    #[error("object {0} is already watched")]
    AlreadyWatched(String),
    #[error("table {0} already exists")]
    AlreadyExists(String),
    #[error("no observer registered for {0}")]
    NoObserver(String),
    #[error("failed to open table {key}: {status}")]
    EngineFailure { key: String, status: DbStatus },
    #[error("failed to read table {key}: {status}")]
    ReadFailure { key: String, status: DbStatus },
    #[error("failed to register observer on {key}: {status}")]
    RegisterFailure { key: String, status: DbStatus },
    #[error("failed to unregister observer on {key}: {status}")]
    UnregisterFailure { key: String, status: DbStatus },
    #[error("failed to close table {key}: {status}")]
    CloseFailure { key: String, status: DbStatus },
    #[error("allocation failed: {0}")]
    AllocationFailure(String),
    #[error("no cached object matches {0}")]
    GetFailure(String),
    #[error("field {field} holds {actual:?}, not {expected:?}")]
    TypeMismatch {
        field: String,
        expected: ValueType,
        actual: ValueType,
    },
    #[error("value codec error: {0}")]
    Codec(String),
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),
    #[error("background task failed: {0}")]
    TaskFailed(String),
    #[error("key-value engine returned {0}")]
    Backend(#[from] DbStatus),
}

impl ObjectStoreError {
    /// Status code handed to the binding layer. Never [`SUCCESS`].
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::NotInitialized => 1,
            Self::NotFound(_) => 2,
            Self::NullObject => 3,
            Self::NullObjectStore => 4,
            Self::AlreadyWatched(_) => 5,
            Self::AlreadyExists(_) => 6,
            Self::NoObserver(_) => 7,
            Self::EngineFailure { .. } => 8,
            Self::ReadFailure { .. } => 9,
            Self::RegisterFailure { .. } => 10,
            Self::UnregisterFailure { .. } => 11,
            Self::CloseFailure { .. } => 12,
            Self::AllocationFailure(_) => 13,
            Self::GetFailure(_) => 14,
            Self::TypeMismatch { .. } => 15,
            Self::Codec(_) => 16,
            Self::InvalidSessionId(_) => 17,
            Self::TaskFailed(_) => 18,
            Self::Backend(status) => status.code(),
        }
    }

    /// Whether this error means "no such table/object".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Backend(DbStatus::NotFound))
    }
}

/// Collapses a result into the status code handed to the binding layer.
#[must_use]
pub fn status_of<T>(result: &Result<T>) -> u32 {
    match result {
        Ok(_) => SUCCESS,
        Err(e) => e.code(),
    }
}
