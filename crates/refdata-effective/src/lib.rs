//! refdata-effective — which stream is authoritative at an instant.
//!
//! Candidate streams for a `(feed, type)` pair are fetched from an
//! [`EffectiveStreamSource`] and cached for a fixed TTL. Selection picks the
//! candidate with the greatest effective time not after the event time.

pub mod cache;
pub mod error;
pub mod service;
pub mod source;

pub use cache::{CacheSettings, CacheStats, EffectiveStreamCache};
pub use error::{EffectiveError, EffectiveResult};
pub use service::EffectiveStreamService;
pub use source::{EffectiveStreamSource, StaticEffectiveStreams};
