//! refdata-core — shared types for temporal reference data resolution.
//!
//! Reference data is delivered as a sequence of independently loaded,
//! versioned snapshots ("streams"), each stamped with an effective time.
//! This crate holds the vocabulary every other crate speaks:
//!
//! - [`Value`] payloads and their typed-byte encoding
//! - stream and map identities ([`RefStreamDefinition`], [`MapDefinition`])
//! - candidate streams per feed ([`EffectiveMeta`], [`EffectiveMetaSet`])
//! - possibly nested lookup requests ([`LookupIdentifier`])
//! - TOML configuration ([`ReferenceDataConfig`])

pub mod config;
pub mod effective;
pub mod error;
pub mod lookup;
pub mod time;
pub mod types;
pub mod value;

pub use config::ReferenceDataConfig;
pub use effective::{EffectiveMeta, EffectiveMetaSet, EffectiveStreamKey};
pub use error::{CoreError, CoreResult};
pub use lookup::LookupIdentifier;
pub use types::*;
pub use value::{TypedBytes, Value, ValueType};
