//! Error types for reference data lookups.

use refdata_core::CoreError;
use refdata_effective::EffectiveError;
use refdata_store::StoreError;
use thiserror::Error;

pub type LookupResult<T> = Result<T, LookupError>;

/// Errors surfaced to callers of the lookup service.
///
/// Per-reference problems during a lookup are not errors; they are
/// recorded as messages on the `ReferenceDataResult`.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid lookup: {0}")]
    Core(#[from] CoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("effective stream error: {0}")]
    Effective(#[from] EffectiveError),
}
