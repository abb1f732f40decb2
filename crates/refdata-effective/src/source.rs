//! Suppliers of candidate streams.

use std::collections::HashMap;
use std::sync::RwLock;

use refdata_core::{EffectiveMeta, EffectiveMetaSet, EffectiveStreamKey};

/// Produces the full candidate set for a feed and stream type.
///
/// Called by the cache on a miss or after expiry.
pub trait EffectiveStreamSource: Send + Sync {
    fn find_effective_streams(&self, key: &EffectiveStreamKey) -> anyhow::Result<EffectiveMetaSet>;
}

impl<F> EffectiveStreamSource for F
where
    F: Fn(&EffectiveStreamKey) -> anyhow::Result<EffectiveMetaSet> + Send + Sync,
{
    fn find_effective_streams(&self, key: &EffectiveStreamKey) -> anyhow::Result<EffectiveMetaSet> {
        self(key)
    }
}

/// A registry of known streams held in memory.
///
/// Unknown feeds yield an empty set.
#[derive(Default)]
pub struct StaticEffectiveStreams {
    streams: RwLock<HashMap<EffectiveStreamKey, Vec<EffectiveMeta>>>,
}

impl StaticEffectiveStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register stream `id` for a feed and type, effective from `effective_ms`.
    pub fn add(&self, feed_name: &str, type_name: &str, id: u64, effective_ms: i64) {
        let key = EffectiveStreamKey::new(feed_name, type_name);
        let meta = EffectiveMeta {
            id,
            feed_name: feed_name.to_string(),
            type_name: type_name.to_string(),
            effective_ms,
        };
        self.streams
            .write()
            .expect("effective streams lock")
            .entry(key)
            .or_default()
            .push(meta);
    }
}

impl EffectiveStreamSource for StaticEffectiveStreams {
    fn find_effective_streams(&self, key: &EffectiveStreamKey) -> anyhow::Result<EffectiveMetaSet> {
        let streams = self.streams.read().expect("effective streams lock");
        let builder = EffectiveMetaSet::builder(key.feed_name.clone(), key.type_name.clone());
        let set = streams
            .get(key)
            .into_iter()
            .flatten()
            .cloned()
            .fold(builder, |builder, meta| builder.add_meta(meta))
            .build();
        Ok(set)
    }
}
