//! Error types for effective stream resolution.

use thiserror::Error;

pub type EffectiveResult<T> = Result<T, EffectiveError>;

#[derive(Debug, Clone, Error)]
pub enum EffectiveError {
    /// The supplier of candidate streams failed for this key.
    #[error("failed to find effective streams for {key}: {message}")]
    Source { key: String, message: String },
}
