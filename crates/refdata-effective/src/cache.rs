//! Effective stream cache with TTL expiration, LRU eviction, and
//! single-flight refresh.
//!
//! Each entry holds the candidate set for one `(feed, type)` key. Entries
//! are created empty under the map lock and filled outside it, so callers
//! asking for a key that is being computed wait for that computation
//! instead of repeating it.
//!
//! Cache statistics (hits, misses, evictions) are emitted as `tracing`
//! fields.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use refdata_core::config::EffectiveStreamCacheConfig;
use refdata_core::{CoreResult, EffectiveMetaSet, EffectiveStreamKey};
use tracing::{debug, info, warn};

use crate::error::{EffectiveError, EffectiveResult};
use crate::source::EffectiveStreamSource;

/// Settings for the effective stream cache.
#[derive(Clone, Debug)]
pub struct CacheSettings {
    /// Time-to-live for cache entries (default: 60 seconds).
    pub ttl: Duration,
    /// Maximum number of entries in the cache (default: 1024).
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_entries: 1024,
        }
    }
}

impl CacheSettings {
    pub fn from_config(config: &EffectiveStreamCacheConfig) -> CoreResult<Self> {
        Ok(Self {
            ttl: config.ttl()?,
            max_entries: config.max_entries.max(1),
        })
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

type Computed = Result<Arc<EffectiveMetaSet>, String>;

struct CacheEntry {
    inserted_at: Instant,
    /// Nanos since cache creation, for LRU.
    last_accessed_nanos: AtomicU64,
    value: OnceLock<Computed>,
}

impl CacheEntry {
    fn new(cache_epoch: Instant) -> Self {
        let now = Instant::now();
        Self {
            inserted_at: now,
            last_accessed_nanos: AtomicU64::new(now.duration_since(cache_epoch).as_nanos() as u64),
            value: OnceLock::new(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }

    fn touch(&self, cache_epoch: Instant) {
        let nanos = Instant::now().duration_since(cache_epoch).as_nanos() as u64;
        self.last_accessed_nanos.store(nanos, Ordering::Relaxed);
    }
}

/// Thread-safe cache of candidate stream sets keyed by feed and type.
///
/// Owned by whoever composes the lookup service; [`clear`](Self::clear)
/// drops every entry.
pub struct EffectiveStreamCache {
    source: Arc<dyn EffectiveStreamSource>,
    settings: CacheSettings,
    epoch: Instant,
    entries: Mutex<HashMap<EffectiveStreamKey, Arc<CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl EffectiveStreamCache {
    pub fn new(source: Arc<dyn EffectiveStreamSource>, settings: CacheSettings) -> Self {
        Self {
            source,
            settings,
            epoch: Instant::now(),
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Candidate set for `key`, computing it on a miss or after expiry.
    ///
    /// A failed computation is not cached; the next call retries it.
    pub fn get(&self, key: &EffectiveStreamKey) -> EffectiveResult<Arc<EffectiveMetaSet>> {
        let entry = self.entry_for(key);
        let computed = entry.value.get_or_init(|| {
            debug!(%key, "computing effective streams");
            self.source
                .find_effective_streams(key)
                .map(Arc::new)
                .map_err(|e| format!("{e:#}"))
        });

        match computed {
            Ok(set) => Ok(Arc::clone(set)),
            Err(message) => {
                let mut entries = self.entries.lock().expect("effective cache lock");
                if entries.get(key).is_some_and(|e| Arc::ptr_eq(e, &entry)) {
                    entries.remove(key);
                }
                warn!(%key, error = %message, "effective stream lookup failed");
                Err(EffectiveError::Source {
                    key: key.to_string(),
                    message: message.clone(),
                })
            }
        }
    }

    /// Find a live entry or install an empty one, under the map lock.
    fn entry_for(&self, key: &EffectiveStreamKey) -> Arc<CacheEntry> {
        let mut entries = self.entries.lock().expect("effective cache lock");

        let live = entries
            .get(key)
            .filter(|entry| !entry.is_expired(self.settings.ttl))
            .cloned();
        if let Some(entry) = live {
            entry.touch(self.epoch);
            let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                %key,
                cache_hits = hits,
                cache_misses = self.misses.load(Ordering::Relaxed),
                cache_evictions = self.evictions.load(Ordering::Relaxed),
                "effective stream cache hit"
            );
            return entry;
        }

        let expired = entries.remove(key).is_some();
        if entries.len() >= self.settings.max_entries {
            self.evict_lru(&mut entries);
        }
        let entry = Arc::new(CacheEntry::new(self.epoch));
        entries.insert(key.clone(), Arc::clone(&entry));

        let misses = self.misses.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            %key,
            expired,
            cache_hits = self.hits.load(Ordering::Relaxed),
            cache_misses = misses,
            cache_evictions = self.evictions.load(Ordering::Relaxed),
            "effective stream cache miss"
        );
        entry
    }

    fn evict_lru(&self, entries: &mut HashMap<EffectiveStreamKey, Arc<CacheEntry>>) {
        let lru_key = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed_nanos.load(Ordering::Relaxed))
            .map(|(key, _)| key.clone());

        if let Some(key) = lru_key {
            entries.remove(&key);
            let evictions = self.evictions.fetch_add(1, Ordering::Relaxed) + 1;
            info!(
                evicted_key = %key,
                cache_evictions = evictions,
                "effective stream cache LRU eviction"
            );
        }
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().expect("effective cache lock");
        let dropped = entries.len();
        entries.clear();
        debug!(dropped, "effective stream cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("effective cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Source that counts calls and returns one candidate per call number.
    struct CountingSource {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl EffectiveStreamSource for CountingSource {
        fn find_effective_streams(&self, key: &EffectiveStreamKey) -> anyhow::Result<EffectiveMetaSet> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
            thread::sleep(self.delay);
            Ok(EffectiveMetaSet::builder(key.feed_name.clone(), key.type_name.clone())
                .add(call + 1, 0)
                .build())
        }
    }

    fn key(feed: &str) -> EffectiveStreamKey {
        EffectiveStreamKey::new(feed, "Reference")
    }

    // ── Hits and misses ──────────────────────────────────────────────

    #[test]
    fn second_get_is_a_hit() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = EffectiveStreamCache::new(source.clone(), CacheSettings::default());

        let first = cache.get(&key("A")).unwrap();
        let second = cache.get(&key("A")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls(), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                evictions: 0
            }
        );
    }

    #[test]
    fn default_settings_values() {
        let settings = CacheSettings::default();
        assert_eq!(settings.ttl, Duration::from_secs(60));
        assert_eq!(settings.max_entries, 1024);
    }

    // ── TTL Expiration ───────────────────────────────────────────────

    #[test]
    fn entry_recomputed_after_ttl() {
        let source = CountingSource::new(Duration::ZERO);
        let settings = CacheSettings {
            ttl: Duration::from_millis(50),
            max_entries: 16,
        };
        let cache = EffectiveStreamCache::new(source.clone(), settings);

        let first = cache.get(&key("A")).unwrap();
        thread::sleep(Duration::from_millis(80));
        let second = cache.get(&key("A")).unwrap();

        assert_eq!(source.calls(), 2);
        assert_ne!(first.first().unwrap().id, second.first().unwrap().id);
        assert_eq!(cache.len(), 1);
    }

    // ── LRU Eviction ─────────────────────────────────────────────────

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let source = CountingSource::new(Duration::ZERO);
        let settings = CacheSettings {
            ttl: Duration::from_secs(60),
            max_entries: 2,
        };
        let cache = EffectiveStreamCache::new(source.clone(), settings);

        cache.get(&key("A")).unwrap();
        thread::sleep(Duration::from_millis(2));
        cache.get(&key("B")).unwrap();
        thread::sleep(Duration::from_millis(2));
        // Touch A so B becomes the least recently used.
        cache.get(&key("A")).unwrap();
        thread::sleep(Duration::from_millis(2));
        cache.get(&key("C")).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        let calls_before = source.calls();
        cache.get(&key("A")).unwrap();
        assert_eq!(source.calls(), calls_before, "A should still be cached");
        cache.get(&key("B")).unwrap();
        assert_eq!(source.calls(), calls_before + 1, "B should have been evicted");
    }

    // ── Single flight ────────────────────────────────────────────────

    #[test]
    fn concurrent_misses_compute_once() {
        let source = CountingSource::new(Duration::from_millis(50));
        let cache = EffectiveStreamCache::new(source.clone(), CacheSettings::default());
        let barrier = Barrier::new(8);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    let set = cache.get(&key("A")).unwrap();
                    assert_eq!(set.len(), 1);
                });
            }
        });

        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source = move |key: &EffectiveStreamKey| -> anyhow::Result<EffectiveMetaSet> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("metadata service unavailable");
            }
            Ok(EffectiveMetaSet::empty(key.feed_name.clone(), key.type_name.clone()))
        };
        let cache = EffectiveStreamCache::new(Arc::new(source), CacheSettings::default());

        let err = cache.get(&key("A")).unwrap_err();
        assert!(err.to_string().contains("metadata service unavailable"));
        assert!(cache.is_empty());

        assert!(cache.get(&key("A")).unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_drops_entries() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = EffectiveStreamCache::new(source.clone(), CacheSettings::default());
        cache.get(&key("A")).unwrap();
        cache.get(&key("B")).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        cache.get(&key("A")).unwrap();
        assert_eq!(source.calls(), 3);
    }
}
