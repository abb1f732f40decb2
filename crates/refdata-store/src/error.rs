//! Error types for the reference data store.

use refdata_core::CoreError;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// Missing data is never an error; lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("commit error: {0}")]
    Commit(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("load of {stream} failed: {message}")]
    Load { stream: String, message: String },

    #[error("loader misuse: {0}")]
    LoaderState(String),

    #[error("corrupt data: {0}")]
    CorruptData(String),
}

impl From<CoreError> for StoreError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::CorruptData(msg) => StoreError::CorruptData(msg),
            other => StoreError::CorruptData(other.to_string()),
        }
    }
}
