//! Process-local store keeping one keyspace per map.
//!
//! Satisfies the same contract as the redb store. Useful as an
//! additional read-only backend and for tests that need no file.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use refdata_core::{MapDefinition, RefStreamDefinition, TypedBytes, Value};
use tracing::{debug, info};

use crate::error::StoreResult;
use crate::loader::{LoadBackend, LoadBody, StagedLoad, load_unless_complete};
use crate::permits::LoadPermits;
use crate::pool::ByteBufferPool;
use crate::store::RefDataStore;
use crate::types::{
    LoadOutcome, LoadState, LookupKey, ProcessingInfo, PurgeSummary, StorageType, StreamRecord,
    purge_cutoff,
};

#[derive(Default)]
struct HeapMap {
    keys: HashMap<String, Value>,
    /// Range start -> (exclusive end, value).
    ranges: BTreeMap<u64, (u64, Value)>,
}

impl HeapMap {
    fn find(&self, key: &LookupKey) -> Option<&Value> {
        match key {
            LookupKey::Exact(k) => self.keys.get(k),
            LookupKey::InRange(k) => match self.ranges.range(..=*k).next_back() {
                Some((_, (to, value))) if *k < *to => Some(value),
                _ => None,
            },
        }
    }

    fn entry_count(&self) -> u64 {
        (self.keys.len() + self.ranges.len()) as u64
    }
}

#[derive(Default)]
struct HeapState {
    streams: HashMap<RefStreamDefinition, ProcessingInfo>,
    maps: HashMap<MapDefinition, HeapMap>,
}

impl HeapState {
    fn is_complete(&self, stream: &RefStreamDefinition) -> bool {
        self.streams
            .get(stream)
            .is_some_and(|info| info.state == LoadState::Complete)
    }

    fn find(&self, map: &MapDefinition, key: &LookupKey) -> Option<&Value> {
        if !self.is_complete(&map.stream) {
            return None;
        }
        self.maps.get(map)?.find(key)
    }

    fn remove_stream(&mut self, stream: &RefStreamDefinition) -> PurgeSummary {
        let mut summary = PurgeSummary::default();
        if self.streams.remove(stream).is_some() {
            summary.streams_purged = 1;
        }
        self.maps.retain(|map, entries| {
            if &map.stream != stream {
                return true;
            }
            summary.maps_purged += 1;
            summary.entries_purged += entries.entry_count();
            false
        });
        summary
    }
}

/// In-memory [`RefDataStore`].
///
/// Access times live outside the data lock so lookups only ever take it
/// for reading. Lock order is `state` then `last_access`.
pub struct HeapRefDataStore {
    state: RwLock<HeapState>,
    last_access: Mutex<HashMap<RefStreamDefinition, i64>>,
    permits: LoadPermits,
    pool: ByteBufferPool,
}

impl HeapRefDataStore {
    pub fn new() -> Self {
        Self::with_pool_size(ByteBufferPool::DEFAULT_MAX_IDLE)
    }

    pub fn with_pool_size(max_idle_buffers: usize) -> Self {
        Self {
            state: RwLock::new(HeapState::default()),
            last_access: Mutex::new(HashMap::new()),
            permits: LoadPermits::new(),
            pool: ByteBufferPool::new(max_idle_buffers),
        }
    }

    /// `info` with the latest recorded access folded in.
    fn with_access_time(&self, stream: &RefStreamDefinition, info: &ProcessingInfo) -> ProcessingInfo {
        let mut info = info.clone();
        let access = self.last_access.lock().expect("last access lock");
        if let Some(&accessed) = access.get(stream) {
            info.last_accessed_time_ms = info.last_accessed_time_ms.max(accessed);
        }
        info
    }

    fn purge_where<F>(&self, label: &str, select: F) -> PurgeSummary
    where
        F: Fn(&RefStreamDefinition, &ProcessingInfo) -> bool,
    {
        let candidates: Vec<RefStreamDefinition> = {
            let state = self.state.read().expect("heap store lock");
            state
                .streams
                .iter()
                .filter(|(stream, info)| select(*stream, &self.with_access_time(*stream, *info)))
                .map(|(stream, _)| stream.clone())
                .collect()
        };

        let mut total = PurgeSummary::default();
        for stream in candidates {
            let _permit = self.permits.acquire(&stream);
            let mut state = self.state.write().expect("heap store lock");
            let still_selected = state
                .streams
                .get(&stream)
                .is_some_and(|info| select(&stream, &self.with_access_time(&stream, info)));
            if still_selected {
                total.add(state.remove_stream(&stream));
                self.last_access.lock().expect("last access lock").remove(&stream);
                debug!(%stream, "purged stream from heap store");
            }
        }
        if !total.is_zero() {
            info!(
                store = "heap",
                purge = label,
                streams = total.streams_purged,
                maps = total.maps_purged,
                entries = total.entries_purged,
                "purge complete"
            );
        }
        total
    }
}

impl Default for HeapRefDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBackend for HeapRefDataStore {
    fn backend_name(&self) -> &'static str {
        "heap"
    }

    fn load_state(&self, stream: &RefStreamDefinition) -> StoreResult<LoadState> {
        let state = self.state.read().expect("heap store lock");
        Ok(state
            .streams
            .get(stream)
            .map_or(LoadState::NotLoaded, |info| info.state))
    }

    fn record_access(&self, stream: &RefStreamDefinition, now_ms: i64) {
        let mut access = self.last_access.lock().expect("last access lock");
        let entry = access.entry(stream.clone()).or_insert(now_ms);
        *entry = (*entry).max(now_ms);
    }

    fn mark_loading(&self, stream: &RefStreamDefinition, effective_time_ms: i64, now_ms: i64) -> StoreResult<()> {
        let mut state = self.state.write().expect("heap store lock");
        state.streams.insert(
            stream.clone(),
            ProcessingInfo {
                create_time_ms: now_ms,
                last_accessed_time_ms: now_ms,
                effective_time_ms,
                state: LoadState::Loading,
            },
        );
        Ok(())
    }

    fn publish(&self, stream: &RefStreamDefinition, staged: StagedLoad, now_ms: i64) -> StoreResult<()> {
        let mut state = self.state.write().expect("heap store lock");
        if staged.purge_existing {
            state.maps.retain(|map, _| &map.stream != stream);
        }
        for (map_name, staged_map) in staged.maps {
            let map = MapDefinition::new(stream.clone(), &map_name);
            let entries = state.maps.entry(map).or_default();
            entries.keys.extend(staged_map.keys);
            entries.ranges.extend(staged_map.ranges);
        }
        if let Some(info) = state.streams.get_mut(stream) {
            info.state = LoadState::Complete;
            info.last_accessed_time_ms = now_ms;
        }
        Ok(())
    }

    fn abandon(&self, stream: &RefStreamDefinition) -> StoreResult<()> {
        let mut state = self.state.write().expect("heap store lock");
        let unfinished = state
            .streams
            .get(stream)
            .is_some_and(|info| info.state != LoadState::Complete);
        if unfinished {
            state.remove_stream(stream);
            self.last_access.lock().expect("last access lock").remove(stream);
        }
        Ok(())
    }
}

impl RefDataStore for HeapRefDataStore {
    fn storage_type(&self) -> StorageType {
        StorageType::Heap
    }

    fn load_state(&self, stream: &RefStreamDefinition) -> StoreResult<LoadState> {
        LoadBackend::load_state(self, stream)
    }

    fn processing_info(&self, stream: &RefStreamDefinition) -> StoreResult<Option<ProcessingInfo>> {
        let state = self.state.read().expect("heap store lock");
        Ok(state
            .streams
            .get(stream)
            .map(|info| self.with_access_time(stream, info)))
    }

    fn list_processing_info(&self, limit: Option<usize>) -> StoreResult<Vec<StreamRecord>> {
        let state = self.state.read().expect("heap store lock");
        let mut records: Vec<StreamRecord> = state
            .streams
            .iter()
            .map(|(stream, info)| StreamRecord {
                stream: stream.clone(),
                info: self.with_access_time(stream, info),
            })
            .collect();
        records.sort_by(|a, b| b.info.last_accessed_time_ms.cmp(&a.info.last_accessed_time_ms));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    fn with_loader_unless_complete(
        &self,
        stream: &RefStreamDefinition,
        effective_time_ms: i64,
        body: &mut LoadBody<'_>,
    ) -> StoreResult<LoadOutcome> {
        load_unless_complete(self, &self.permits, stream, effective_time_ms, body)
    }

    fn contains(&self, map: &MapDefinition, key: &LookupKey) -> StoreResult<bool> {
        let state = self.state.read().expect("heap store lock");
        Ok(state.find(map, key).is_some())
    }

    fn get_value(&self, map: &MapDefinition, key: &LookupKey) -> StoreResult<Option<Value>> {
        let state = self.state.read().expect("heap store lock");
        Ok(state.find(map, key).cloned())
    }

    fn consume_value_bytes(
        &self,
        map: &MapDefinition,
        key: &LookupKey,
        consumer: &mut dyn FnMut(TypedBytes<'_>),
    ) -> StoreResult<bool> {
        let buf = {
            let state = self.state.read().expect("heap store lock");
            let Some(value) = state.find(map, key) else {
                return Ok(false);
            };
            let mut buf = self.pool.acquire(value.encoded_len());
            value.encode_into(&mut buf);
            buf
        };
        // The consumer runs with no store lock held.
        consumer(TypedBytes::from_encoded(&buf)?);
        Ok(true)
    }

    fn map_names(&self, stream: &RefStreamDefinition) -> StoreResult<Vec<String>> {
        let state = self.state.read().expect("heap store lock");
        if !state.is_complete(stream) {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = state
            .maps
            .keys()
            .filter(|map| &map.stream == stream)
            .map(|map| map.map_name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn purge_old_data(&self, now_ms: i64, purge_age: Duration) -> StoreResult<PurgeSummary> {
        let cutoff = purge_cutoff(now_ms, purge_age);
        Ok(self.purge_where("age", |_, info| {
            info.state == LoadState::Complete && info.last_accessed_time_ms < cutoff
        }))
    }

    fn purge_stream(&self, stream_id: u64) -> StoreResult<PurgeSummary> {
        Ok(self.purge_where("stream", |stream, _| stream.stream_id == stream_id))
    }

    fn key_value_entry_count(&self) -> StoreResult<u64> {
        let state = self.state.read().expect("heap store lock");
        Ok(state.maps.values().map(|m| m.keys.len() as u64).sum())
    }

    fn range_value_entry_count(&self) -> StoreResult<u64> {
        let state = self.state.read().expect("heap store lock");
        Ok(state.maps.values().map(|m| m.ranges.len() as u64).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::RefDataLoader;
    use crate::store::RefDataStoreExt;
    use crate::types::PutOutcome;
    use refdata_core::{DocRef, KeyRange};
    use std::sync::Arc;

    fn stream(id: u64) -> RefStreamDefinition {
        RefStreamDefinition::new(DocRef::pipeline("p-uuid", "REF_PIPE"), "v1", id)
    }

    fn load(store: &HeapRefDataStore, stream: &RefStreamDefinition) -> LoadOutcome {
        let map = MapDefinition::new(stream.clone(), "users");
        let ranges = MapDefinition::new(stream.clone(), "ids");
        store
            .with_loader_unless_complete(stream, 1_000, &mut |loader: &mut dyn RefDataLoader| -> anyhow::Result<()> {
                loader.initialise(false)?;
                loader.put(&map, "user1", Value::text("Jane"))?;
                loader.put_range(&ranges, KeyRange::new(2, 30), Value::text("low"))?;
                loader.complete_processing()?;
                Ok(())
            })
            .unwrap()
    }

    #[test]
    fn loaded_entries_are_visible() {
        let store = HeapRefDataStore::new();
        let s = stream(1);
        assert!(matches!(load(&store, &s), LoadOutcome::Loaded(_)));
        assert!(store.is_complete(&s).unwrap());

        let map = MapDefinition::new(s.clone(), "USERS");
        let value = store
            .get_value(&map, &LookupKey::Exact("user1".into()))
            .unwrap();
        assert_eq!(value, Some(Value::text("Jane")));

        let ranges = MapDefinition::new(s.clone(), "ids");
        assert!(store.contains(&ranges, &LookupKey::InRange(29)).unwrap());
        assert!(!store.contains(&ranges, &LookupKey::InRange(30)).unwrap());
        assert_eq!(store.map_names(&s).unwrap(), vec!["IDS", "USERS"]);
    }

    #[test]
    fn second_load_is_skipped() {
        let store = HeapRefDataStore::new();
        let s = stream(1);
        load(&store, &s);
        assert_eq!(load(&store, &s), LoadOutcome::AlreadyComplete);
    }

    #[test]
    fn failed_load_leaves_nothing_behind() {
        let store = HeapRefDataStore::new();
        let s = stream(1);
        let map = MapDefinition::new(s.clone(), "users");
        let result = store.with_loader_unless_complete(&s, 0, &mut |loader: &mut dyn RefDataLoader| -> anyhow::Result<()> {
            loader.initialise(false)?;
            loader.put(&map, "user1", Value::text("Jane"))?;
            anyhow::bail!("source unreadable")
        });
        assert!(result.is_err());
        assert_eq!(RefDataStore::load_state(&store, &s).unwrap(), LoadState::NotLoaded);
        assert!(store.processing_info(&s).unwrap().is_none());
        assert_eq!(store.key_value_entry_count().unwrap(), 0);
    }

    #[test]
    fn consume_pushes_typed_bytes() {
        let store: Arc<dyn RefDataStore> = Arc::new(HeapRefDataStore::new());
        let s = stream(1);
        let map = MapDefinition::new(s.clone(), "blobs");
        store
            .with_loader_unless_complete(&s, 0, &mut |loader: &mut dyn RefDataLoader| -> anyhow::Result<()> {
                loader.initialise(false)?;
                assert_eq!(
                    loader.put(&map, "k", Value::Binary(vec![1, 2, 3]))?,
                    PutOutcome::Staged
                );
                loader.complete_processing()?;
                Ok(())
            })
            .unwrap();

        let proxy = store.lookup(&map, "k").unwrap().unwrap();
        let mut seen = Vec::new();
        assert!(proxy.consume(|bytes| seen.extend_from_slice(bytes.bytes)).unwrap());
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn purge_stream_removes_all_versions() {
        let store = HeapRefDataStore::new();
        let v1 = stream(7);
        let v2 = RefStreamDefinition::new(DocRef::pipeline("p-uuid", "REF_PIPE"), "v2", 7);
        load(&store, &v1);
        load(&store, &v2);
        load(&store, &stream(8));

        let summary = store.purge_stream(7).unwrap();
        assert_eq!(summary.streams_purged, 2);
        assert_eq!(summary.maps_purged, 4);
        assert!(!store.is_complete(&v1).unwrap());
        assert!(store.is_complete(&stream(8)).unwrap());
    }

    #[test]
    fn purge_old_data_uses_last_access() {
        let store = HeapRefDataStore::new();
        let s = stream(1);
        load(&store, &s);
        let accessed = store.processing_info(&s).unwrap().unwrap().last_accessed_time_ms;

        let kept = store
            .purge_old_data(accessed + 500, Duration::from_secs(1))
            .unwrap();
        assert!(kept.is_zero());

        let purged = store
            .purge_old_data(accessed + 5_000, Duration::from_secs(1))
            .unwrap();
        assert_eq!(purged.streams_purged, 1);
        assert_eq!(purged.entries_purged, 2);
    }

    #[test]
    fn consumer_runs_without_holding_the_store() {
        let store = HeapRefDataStore::new();
        let s = stream(1);
        load(&store, &s);
        let map = MapDefinition::new(s.clone(), "users");

        // Loading from inside the consumer needs the write lock.
        let mut nested = None;
        let found = store
            .consume_value_bytes(&map, &LookupKey::Exact("user1".into()), &mut |bytes: TypedBytes<'_>| {
                assert_eq!(bytes.bytes, b"Jane");
                nested = Some(load(&store, &stream(2)));
            })
            .unwrap();
        assert!(found);
        assert!(matches!(nested, Some(LoadOutcome::Loaded(_))));
        assert!(store.is_complete(&stream(2)).unwrap());
    }

    #[test]
    fn repeat_loads_refresh_access_time() {
        let store = HeapRefDataStore::new();
        let s = stream(1);
        load(&store, &s);
        let loaded = store.processing_info(&s).unwrap().unwrap().last_accessed_time_ms;

        store.record_access(&s, loaded + 10_000);
        let info = store.processing_info(&s).unwrap().unwrap();
        assert_eq!(info.last_accessed_time_ms, loaded + 10_000);
        assert_eq!(
            store.list_processing_info(None).unwrap()[0].info.last_accessed_time_ms,
            loaded + 10_000
        );

        // Old by load time, recent by the recorded access.
        let kept = store
            .purge_old_data(loaded + 10_500, Duration::from_secs(1))
            .unwrap();
        assert!(kept.is_zero());
        let purged = store
            .purge_old_data(loaded + 12_000, Duration::from_secs(1))
            .unwrap();
        assert_eq!(purged.streams_purged, 1);
        assert!(store.last_access.lock().unwrap().is_empty());
    }

    #[test]
    fn purge_with_unbounded_age_keeps_everything() {
        let store = HeapRefDataStore::new();
        let s = stream(1);
        load(&store, &s);
        let summary = store.purge_old_data(i64::MAX, Duration::MAX).unwrap();
        assert!(summary.is_zero());
        assert!(store.is_complete(&s).unwrap());
    }
}
