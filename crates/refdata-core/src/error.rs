//! Error types shared by the reference data crates.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building or decoding core types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid lookup identifier: {0}")]
    InvalidLookup(String),

    #[error("corrupt value data: {0}")]
    CorruptData(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("configuration error: {0}")]
    Config(String),
}
