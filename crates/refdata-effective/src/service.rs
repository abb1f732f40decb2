//! Selection of the stream effective at an event time.

use std::sync::Arc;

use refdata_core::config::EffectiveStreamCacheConfig;
use refdata_core::{CoreResult, EffectiveMeta, EffectiveMetaSet, EffectiveStreamKey};
use tracing::debug;

use crate::cache::{CacheSettings, CacheStats, EffectiveStreamCache};
use crate::error::EffectiveResult;
use crate::source::EffectiveStreamSource;

/// Picks, for a feed and type, the candidate stream effective at a given
/// instant. Backed by an [`EffectiveStreamCache`] it owns.
pub struct EffectiveStreamService {
    cache: EffectiveStreamCache,
}

impl EffectiveStreamService {
    pub fn new(source: Arc<dyn EffectiveStreamSource>, settings: CacheSettings) -> Self {
        Self {
            cache: EffectiveStreamCache::new(source, settings),
        }
    }

    pub fn from_config(
        source: Arc<dyn EffectiveStreamSource>,
        config: &EffectiveStreamCacheConfig,
    ) -> CoreResult<Self> {
        Ok(Self::new(source, CacheSettings::from_config(config)?))
    }

    /// All candidates for a feed and type, oldest first.
    pub fn effective_streams(&self, feed_name: &str, type_name: &str) -> EffectiveResult<Arc<EffectiveMetaSet>> {
        self.cache.get(&EffectiveStreamKey::new(feed_name, type_name))
    }

    /// The candidate with the greatest effective time at or before
    /// `event_time_ms`, or `None` if the event precedes them all.
    pub fn determine_effective_stream(
        &self,
        feed_name: &str,
        type_name: &str,
        event_time_ms: i64,
    ) -> EffectiveResult<Option<EffectiveMeta>> {
        let set = self.effective_streams(feed_name, type_name)?;
        let selected = set.select(event_time_ms).cloned();
        debug!(
            feed = feed_name,
            stream_type = type_name,
            event_time_ms,
            candidates = set.len(),
            selected = ?selected.as_ref().map(|m| m.id),
            "determined effective stream"
        );
        Ok(selected)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop all cached candidate sets.
    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &EffectiveStreamCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticEffectiveStreams;

    fn service() -> EffectiveStreamService {
        let source = StaticEffectiveStreams::new();
        source.add("EMPLOYEES", "Reference", 10, 1_000);
        source.add("EMPLOYEES", "Reference", 20, 2_000);
        source.add("EMPLOYEES", "Reference", 30, 3_000);
        EffectiveStreamService::new(Arc::new(source), CacheSettings::default())
    }

    fn selected(service: &EffectiveStreamService, t: i64) -> Option<u64> {
        service
            .determine_effective_stream("EMPLOYEES", "Reference", t)
            .unwrap()
            .map(|m| m.id)
    }

    #[test]
    fn picks_latest_candidate_not_after_event() {
        let service = service();
        assert_eq!(selected(&service, 999), None);
        assert_eq!(selected(&service, 1_000), Some(10));
        assert_eq!(selected(&service, 2_500), Some(20));
        assert_eq!(selected(&service, 3_000), Some(30));
        assert_eq!(selected(&service, 9_999_999), Some(30));
    }

    #[test]
    fn unknown_feed_selects_nothing() {
        let service = service();
        assert_eq!(
            service
                .determine_effective_stream("UNKNOWN", "Reference", 5_000)
                .unwrap(),
            None
        );
    }

    #[test]
    fn repeated_selection_uses_cache() {
        let service = service();
        selected(&service, 1_500);
        selected(&service, 2_500);
        let stats = service.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn from_config_reads_ttl() {
        let config = EffectiveStreamCacheConfig {
            ttl: "2m".to_string(),
            max_entries: 8,
        };
        let service =
            EffectiveStreamService::from_config(Arc::new(StaticEffectiveStreams::new()), &config).unwrap();
        assert_eq!(service.cache().settings().ttl.as_secs(), 120);
        assert_eq!(service.cache().settings().max_entries, 8);
    }
}
