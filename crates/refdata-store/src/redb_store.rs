//! RedbRefDataStore: redb-backed persistent reference data store.
//!
//! Every map of a loaded stream gets its own pair of sub-tables (exact
//! keys and ranges) that hold value hashes; the encoded values live once
//! in a shared, reference-counted value table. A load is published in a
//! single write transaction together with its `Complete` record.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use redb::{
    Database, ReadOnlyTable, ReadTransaction, ReadableDatabase, ReadableTable, Table, TableDefinition,
    TableError, WriteTransaction,
};
use refdata_core::config::StoreConfig;
use refdata_core::{MapDefinition, RefStreamDefinition, TypedBytes, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::loader::{LoadBackend, LoadBody, StagedLoad, load_unless_complete};
use crate::permits::LoadPermits;
use crate::pool::ByteBufferPool;
use crate::store::RefDataStore;
use crate::tables::*;
use crate::types::{
    LoadOutcome, LoadState, LookupKey, ProcessingInfo, PurgeSummary, StorageType, StreamRecord,
    purge_cutoff,
};

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

type ValuesTable<'t> = Table<'t, &'static str, &'static [u8]>;
type RefsTable<'t> = Table<'t, &'static str, u64>;

/// Persistent [`RefDataStore`] backed by redb.
pub struct RedbRefDataStore {
    db: Arc<Database>,
    permits: LoadPermits,
    pool: ByteBufferPool,
    /// Last access per stream table key, flushed to disk on purge.
    last_access: Mutex<HashMap<String, i64>>,
}

impl RedbRefDataStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_pool_size(path, ByteBufferPool::DEFAULT_MAX_IDLE)
    }

    pub fn open_with_pool_size(path: &Path, max_idle_buffers: usize) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db, max_idle_buffers)?;
        debug!(?path, "reference data store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db, ByteBufferPool::DEFAULT_MAX_IDLE)?;
        debug!("in-memory reference data store opened");
        Ok(store)
    }

    /// Open the store described by `[store]` configuration.
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        match &config.path {
            Some(path) => Self::open_with_pool_size(path, config.buffer_pool_size),
            None => {
                let backend = redb::backends::InMemoryBackend::new();
                let db = Database::builder()
                    .create_with_backend(backend)
                    .map_err(map_err!(Open))?;
                Self::from_database(db, config.buffer_pool_size)
            }
        }
    }

    fn from_database(db: Database, max_idle_buffers: usize) -> StoreResult<Self> {
        let store = Self {
            db: Arc::new(db),
            permits: LoadPermits::new(),
            pool: ByteBufferPool::new(max_idle_buffers),
            last_access: Mutex::new(HashMap::new()),
        };
        store.ensure_tables()?;
        store.purge_partial_loads()?;
        Ok(store)
    }

    /// Create all fixed tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(PROCESSING_INFO).map_err(map_err!(Table))?;
        txn.open_table(MAP_UIDS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.open_table(VALUES).map_err(map_err!(Table))?;
        txn.open_table(VALUE_REFS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Commit))?;
        Ok(())
    }

    /// Remove streams left unfinished by a previous process so they reload
    /// cleanly. Returns the number of streams removed.
    pub fn purge_partial_loads(&self) -> StoreResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let partial: Vec<String> = {
            let table = txn.open_table(PROCESSING_INFO).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if decode_record(value.value())?.info.state != LoadState::Complete {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };
        for key in &partial {
            delete_stream_data(&txn, key)?;
        }
        txn.commit().map_err(map_err!(Commit))?;
        if !partial.is_empty() {
            warn!(count = partial.len(), "removed partially loaded streams");
        }
        Ok(partial.len())
    }

    /// Persist in-memory last-access times. Returns the number of records
    /// updated.
    pub fn flush_access_times(&self) -> StoreResult<usize> {
        let pending: Vec<(String, i64)> = {
            let access = self.last_access.lock().expect("last access lock");
            access.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        if pending.is_empty() {
            return Ok(0);
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut updated = 0;
        {
            let mut table = txn.open_table(PROCESSING_INFO).map_err(map_err!(Table))?;
            for (key, accessed) in pending {
                let record = match table.get(key.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => decode_record(guard.value())?,
                    None => continue,
                };
                if record.info.last_accessed_time_ms >= accessed {
                    continue;
                }
                let mut record = record;
                record.info.last_accessed_time_ms = accessed;
                let bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
                updated += 1;
            }
        }
        txn.commit().map_err(map_err!(Commit))?;
        debug!(updated, "flushed stream access times");
        Ok(updated)
    }

    /// Number of distinct encoded values held in the shared value table.
    pub fn distinct_value_count(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VALUES).map_err(map_err!(Table))?;
        count_rows(&table)
    }

    // ── Reads ──────────────────────────────────────────────────────

    fn read_record(&self, txn: &ReadTransaction, stream_key: &str) -> StoreResult<Option<StreamRecord>> {
        let table = txn.open_table(PROCESSING_INFO).map_err(map_err!(Table))?;
        match table.get(stream_key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(self.with_access_time(decode_record(guard.value())?))),
            None => Ok(None),
        }
    }

    fn with_access_time(&self, mut record: StreamRecord) -> StreamRecord {
        let access = self.last_access.lock().expect("last access lock");
        if let Some(&accessed) = access.get(&record.stream.table_key()) {
            record.info.last_accessed_time_ms = record.info.last_accessed_time_ms.max(accessed);
        }
        record
    }

    fn all_records(&self) -> StoreResult<Vec<StreamRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROCESSING_INFO).map_err(map_err!(Table))?;
        let mut records = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            records.push(self.with_access_time(decode_record(value.value())?));
        }
        Ok(records)
    }

    fn map_uid(&self, txn: &ReadTransaction, map: &MapDefinition) -> StoreResult<Option<u64>> {
        let table = txn.open_table(MAP_UIDS).map_err(map_err!(Table))?;
        let uid = table
            .get(map.table_key().as_str())
            .map_err(map_err!(Read))?
            .map(|guard| guard.value());
        Ok(uid)
    }

    /// Hash of the value stored for `key`, if the stream is complete and
    /// the key is present.
    fn find_hash(&self, txn: &ReadTransaction, map: &MapDefinition, key: &LookupKey) -> StoreResult<Option<String>> {
        let complete = self
            .read_record(txn, &map.stream.table_key())?
            .is_some_and(|record| record.info.state == LoadState::Complete);
        if !complete {
            return Ok(None);
        }
        let Some(uid) = self.map_uid(txn, map)? else {
            return Ok(None);
        };

        match key {
            LookupKey::Exact(k) => {
                let name = key_value_table_name(uid);
                let Some(table) = open_existing(txn, key_value_table(&name))? else {
                    return Ok(None);
                };
                let hash = table
                    .get(k.as_str())
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value().to_string());
                Ok(hash)
            }
            LookupKey::InRange(k) => {
                let name = range_table_name(uid);
                let Some(table) = open_existing(txn, range_table(&name))? else {
                    return Ok(None);
                };
                // Greatest range start <= key; it matches only if key < to.
                let mut starts = table.range(..=*k).map_err(map_err!(Read))?;
                let Some(entry) = starts.next_back() else {
                    return Ok(None);
                };
                let (_, encoded) = entry.map_err(map_err!(Read))?;
                let (to, hash) = decode_range_value(encoded.value())
                    .ok_or_else(|| StoreError::CorruptData(format!("bad range entry in {map}")))?;
                Ok((*k < to).then(|| hash.to_string()))
            }
        }
    }

    fn map_uids(&self, txn: &ReadTransaction) -> StoreResult<Vec<u64>> {
        let table = txn.open_table(MAP_UIDS).map_err(map_err!(Table))?;
        let mut uids = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, uid) = entry.map_err(map_err!(Read))?;
            uids.push(uid.value());
        }
        Ok(uids)
    }

    // ── Purge ──────────────────────────────────────────────────────

    fn purge_where<F>(&self, label: &str, select: F) -> StoreResult<PurgeSummary>
    where
        F: Fn(&StreamRecord) -> bool,
    {
        let candidates: Vec<StreamRecord> = self
            .all_records()?
            .into_iter()
            .filter(|record| select(record))
            .collect();

        let mut total = PurgeSummary::default();
        for candidate in candidates {
            let stream = &candidate.stream;
            let _permit = self.permits.acquire(stream);
            let stream_key = stream.table_key();

            let still_selected = {
                let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
                self.read_record(&txn, &stream_key)?
                    .is_some_and(|record| select(&record))
            };
            if !still_selected {
                continue;
            }

            let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
            let summary = delete_stream_data(&txn, &stream_key)?;
            txn.commit().map_err(map_err!(Commit))?;
            self.last_access
                .lock()
                .expect("last access lock")
                .remove(&stream_key);
            debug!(%stream, entries = summary.entries_purged, "purged stream");
            total.add(summary);
        }

        if !total.is_zero() {
            info!(
                store = "redb",
                purge = label,
                streams = total.streams_purged,
                maps = total.maps_purged,
                entries = total.entries_purged,
                values_deleted = total.values_deleted,
                values_dereferenced = total.values_dereferenced,
                "purge complete"
            );
        }
        Ok(total)
    }
}

// ── Table helpers ──────────────────────────────────────────────────

fn decode_record(bytes: &[u8]) -> StoreResult<StreamRecord> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Open a table in a read transaction, treating a missing table as absent.
fn open_existing<K, V>(txn: &ReadTransaction, definition: TableDefinition<K, V>) -> StoreResult<Option<ReadOnlyTable<K, V>>>
where
    K: redb::Key + 'static,
    V: redb::Value + 'static,
{
    match txn.open_table(definition) {
        Ok(table) => Ok(Some(table)),
        Err(TableError::TableDoesNotExist(_)) => Ok(None),
        Err(e) => Err(StoreError::Table(e.to_string())),
    }
}

fn count_rows<T, K, V>(table: &T) -> StoreResult<u64>
where
    T: ReadableTable<K, V>,
    K: redb::Key + 'static,
    V: redb::Value + 'static,
{
    let mut count = 0;
    for entry in table.iter().map_err(map_err!(Read))? {
        entry.map_err(map_err!(Read))?;
        count += 1;
    }
    Ok(count)
}

fn next_map_uid(meta: &mut Table<'_, &'static str, u64>) -> StoreResult<u64> {
    let uid = meta
        .get(NEXT_MAP_UID)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(1);
    meta.insert(NEXT_MAP_UID, uid + 1).map_err(map_err!(Write))?;
    Ok(uid)
}

/// Store `value` once by content hash and take a reference to it.
fn store_value(
    values: &mut ValuesTable<'_>,
    refs: &mut RefsTable<'_>,
    pool: &ByteBufferPool,
    value: &Value,
) -> StoreResult<String> {
    let mut buf = pool.acquire(value.encoded_len());
    value.encode_into(&mut buf);
    let hash = hex::encode(Sha256::digest(buf.as_slice()));

    let count = refs
        .get(hash.as_str())
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    if count == 0 {
        values
            .insert(hash.as_str(), buf.as_slice())
            .map_err(map_err!(Write))?;
    }
    refs.insert(hash.as_str(), count + 1).map_err(map_err!(Write))?;
    Ok(hash)
}

/// Drop one reference to a stored value, deleting it at zero.
fn release_value(
    values: &mut ValuesTable<'_>,
    refs: &mut RefsTable<'_>,
    hash: &str,
    summary: &mut PurgeSummary,
) -> StoreResult<()> {
    let count = refs
        .get(hash)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    if count <= 1 {
        refs.remove(hash).map_err(map_err!(Write))?;
        values.remove(hash).map_err(map_err!(Write))?;
        summary.values_deleted += 1;
    } else {
        refs.insert(hash, count - 1).map_err(map_err!(Write))?;
        summary.values_dereferenced += 1;
    }
    Ok(())
}

/// Delete a stream's record, maps, sub-tables and value references.
fn delete_stream_data(txn: &WriteTransaction, stream_key: &str) -> StoreResult<PurgeSummary> {
    let mut summary = PurgeSummary::default();
    let prefix = format!("{stream_key}/");

    let maps: Vec<(String, u64)> = {
        let mut uids = txn.open_table(MAP_UIDS).map_err(map_err!(Table))?;
        let found: Vec<(String, u64)> = uids
            .range(prefix.as_str()..)
            .map_err(map_err!(Read))?
            .map(|item| item.map(|(k, v)| (k.value().to_string(), v.value())))
            .take_while(|item| item.as_ref().map_or(true, |(k, _)| k.starts_with(&prefix)))
            .collect::<Result<_, _>>()
            .map_err(map_err!(Read))?;
        for (key, _) in &found {
            uids.remove(key.as_str()).map_err(map_err!(Write))?;
        }
        found
    };

    let mut hashes = Vec::new();
    for (_, uid) in &maps {
        let kv_name = key_value_table_name(*uid);
        {
            let table = txn
                .open_table(key_value_table(&kv_name))
                .map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, hash) = entry.map_err(map_err!(Read))?;
                hashes.push(hash.value().to_string());
            }
        }
        txn.delete_table(key_value_table(&kv_name))
            .map_err(map_err!(Table))?;

        let range_name = range_table_name(*uid);
        {
            let table = txn
                .open_table(range_table(&range_name))
                .map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, encoded) = entry.map_err(map_err!(Read))?;
                let (_, hash) = decode_range_value(encoded.value()).ok_or_else(|| {
                    StoreError::CorruptData(format!("bad range entry in {range_name}"))
                })?;
                hashes.push(hash.to_string());
            }
        }
        txn.delete_table(range_table(&range_name))
            .map_err(map_err!(Table))?;
    }
    summary.maps_purged = maps.len() as u64;
    summary.entries_purged = hashes.len() as u64;

    {
        let mut values = txn.open_table(VALUES).map_err(map_err!(Table))?;
        let mut refs = txn.open_table(VALUE_REFS).map_err(map_err!(Table))?;
        for hash in &hashes {
            release_value(&mut values, &mut refs, hash, &mut summary)?;
        }
    }

    let mut info = txn.open_table(PROCESSING_INFO).map_err(map_err!(Table))?;
    if info.remove(stream_key).map_err(map_err!(Write))?.is_some() {
        summary.streams_purged = 1;
    }
    Ok(summary)
}

// ── Load protocol hooks ────────────────────────────────────────────

impl LoadBackend for RedbRefDataStore {
    fn backend_name(&self) -> &'static str {
        "redb"
    }

    fn load_state(&self, stream: &RefStreamDefinition) -> StoreResult<LoadState> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        Ok(self
            .read_record(&txn, &stream.table_key())?
            .map_or(LoadState::NotLoaded, |record| record.info.state))
    }

    fn record_access(&self, stream: &RefStreamDefinition, now_ms: i64) {
        let mut access = self.last_access.lock().expect("last access lock");
        let entry = access.entry(stream.table_key()).or_insert(now_ms);
        *entry = (*entry).max(now_ms);
    }

    fn mark_loading(&self, stream: &RefStreamDefinition, effective_time_ms: i64, now_ms: i64) -> StoreResult<()> {
        let record = StreamRecord {
            stream: stream.clone(),
            info: ProcessingInfo {
                create_time_ms: now_ms,
                last_accessed_time_ms: now_ms,
                effective_time_ms,
                state: LoadState::Loading,
            },
        };
        let key = stream.table_key();
        let bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PROCESSING_INFO).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Commit))?;
        debug!(%key, "stream marked loading");
        Ok(())
    }

    fn publish(&self, stream: &RefStreamDefinition, staged: StagedLoad, now_ms: i64) -> StoreResult<()> {
        let stream_key = stream.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;

        let create_time_ms = {
            let table = txn.open_table(PROCESSING_INFO).map_err(map_err!(Table))?;
            match table.get(stream_key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => decode_record(guard.value())?.info.create_time_ms,
                None => now_ms,
            }
        };
        if staged.purge_existing {
            delete_stream_data(&txn, &stream_key)?;
        }

        {
            let mut uids = txn.open_table(MAP_UIDS).map_err(map_err!(Table))?;
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let mut values = txn.open_table(VALUES).map_err(map_err!(Table))?;
            let mut refs = txn.open_table(VALUE_REFS).map_err(map_err!(Table))?;

            for (map_name, staged_map) in &staged.maps {
                let map_key = MapDefinition::new(stream.clone(), map_name).table_key();
                let existing = uids
                    .get(map_key.as_str())
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value());
                let uid = match existing {
                    Some(uid) => uid,
                    None => {
                        let uid = next_map_uid(&mut meta)?;
                        uids.insert(map_key.as_str(), uid).map_err(map_err!(Write))?;
                        uid
                    }
                };

                if !staged_map.keys.is_empty() {
                    let name = key_value_table_name(uid);
                    let mut table = txn
                        .open_table(key_value_table(&name))
                        .map_err(map_err!(Table))?;
                    for (key, value) in &staged_map.keys {
                        let hash = store_value(&mut values, &mut refs, &self.pool, value)?;
                        table
                            .insert(key.as_str(), hash.as_str())
                            .map_err(map_err!(Write))?;
                    }
                }

                if !staged_map.ranges.is_empty() {
                    let name = range_table_name(uid);
                    let mut table = txn.open_table(range_table(&name)).map_err(map_err!(Table))?;
                    for (from, (to, value)) in &staged_map.ranges {
                        let hash = store_value(&mut values, &mut refs, &self.pool, value)?;
                        let encoded = encode_range_value(*to, &hash);
                        table
                            .insert(*from, encoded.as_slice())
                            .map_err(map_err!(Write))?;
                    }
                }
            }
        }

        let record = StreamRecord {
            stream: stream.clone(),
            info: ProcessingInfo {
                create_time_ms,
                last_accessed_time_ms: now_ms,
                effective_time_ms: staged.effective_time_ms,
                state: LoadState::Complete,
            },
        };
        let bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        {
            let mut table = txn.open_table(PROCESSING_INFO).map_err(map_err!(Table))?;
            table
                .insert(stream_key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Commit))?;
        self.record_access(stream, now_ms);
        debug!(%stream_key, maps = staged.maps.len(), "stream published");
        Ok(())
    }

    fn abandon(&self, stream: &RefStreamDefinition) -> StoreResult<()> {
        let stream_key = stream.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let unfinished = {
            let table = txn.open_table(PROCESSING_INFO).map_err(map_err!(Table))?;
            match table.get(stream_key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => decode_record(guard.value())?.info.state != LoadState::Complete,
                None => false,
            }
        };
        if unfinished {
            delete_stream_data(&txn, &stream_key)?;
        }
        txn.commit().map_err(map_err!(Commit))?;
        debug!(%stream_key, unfinished, "abandoned load");
        Ok(())
    }
}

// ── Store contract ─────────────────────────────────────────────────

impl RefDataStore for RedbRefDataStore {
    fn storage_type(&self) -> StorageType {
        StorageType::Redb
    }

    fn load_state(&self, stream: &RefStreamDefinition) -> StoreResult<LoadState> {
        LoadBackend::load_state(self, stream)
    }

    fn processing_info(&self, stream: &RefStreamDefinition) -> StoreResult<Option<ProcessingInfo>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        Ok(self
            .read_record(&txn, &stream.table_key())?
            .map(|record| record.info))
    }

    fn list_processing_info(&self, limit: Option<usize>) -> StoreResult<Vec<StreamRecord>> {
        let mut records = self.all_records()?;
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
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        Ok(self.find_hash(&txn, map, key)?.is_some())
    }

    fn get_value(&self, map: &MapDefinition, key: &LookupKey) -> StoreResult<Option<Value>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let Some(hash) = self.find_hash(&txn, map, key)? else {
            return Ok(None);
        };
        let table = txn.open_table(VALUES).map_err(map_err!(Table))?;
        match table.get(hash.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(Value::decode(guard.value())?)),
            None => Err(StoreError::CorruptData(format!(
                "value {hash} referenced by {map} is missing"
            ))),
        }
    }

    fn consume_value_bytes(
        &self,
        map: &MapDefinition,
        key: &LookupKey,
        consumer: &mut dyn FnMut(TypedBytes<'_>),
    ) -> StoreResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let Some(hash) = self.find_hash(&txn, map, key)? else {
            return Ok(false);
        };
        let table = txn.open_table(VALUES).map_err(map_err!(Table))?;
        match table.get(hash.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                consumer(TypedBytes::from_encoded(guard.value())?);
                Ok(true)
            }
            None => Err(StoreError::CorruptData(format!(
                "value {hash} referenced by {map} is missing"
            ))),
        }
    }

    fn map_names(&self, stream: &RefStreamDefinition) -> StoreResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let stream_key = stream.table_key();
        let complete = self
            .read_record(&txn, &stream_key)?
            .is_some_and(|record| record.info.state == LoadState::Complete);
        if !complete {
            return Ok(Vec::new());
        }

        let prefix = format!("{stream_key}/");
        let table = txn.open_table(MAP_UIDS).map_err(map_err!(Table))?;
        let mut names = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            match key.value().strip_prefix(prefix.as_str()) {
                Some(name) => names.push(name.to_string()),
                None => break,
            }
        }
        Ok(names)
    }

    fn purge_old_data(&self, now_ms: i64, purge_age: Duration) -> StoreResult<PurgeSummary> {
        self.flush_access_times()?;
        let cutoff = purge_cutoff(now_ms, purge_age);
        self.purge_where("age", |record| {
            record.info.state == LoadState::Complete && record.info.last_accessed_time_ms < cutoff
        })
    }

    fn purge_stream(&self, stream_id: u64) -> StoreResult<PurgeSummary> {
        self.purge_where("stream", |record| record.stream.stream_id == stream_id)
    }

    fn key_value_entry_count(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let mut total = 0;
        for uid in self.map_uids(&txn)? {
            let name = key_value_table_name(uid);
            if let Some(table) = open_existing(&txn, key_value_table(&name))? {
                total += count_rows(&table)?;
            }
        }
        Ok(total)
    }

    fn range_value_entry_count(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let mut total = 0;
        for uid in self.map_uids(&txn)? {
            let name = range_table_name(uid);
            if let Some(table) = open_existing(&txn, range_table(&name))? {
                total += count_rows(&table)?;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::RefDataLoader;
    use crate::store::RefDataStoreExt;
    use refdata_core::{DocRef, KeyRange};

    fn stream(id: u64) -> RefStreamDefinition {
        RefStreamDefinition::new(DocRef::pipeline("p-uuid", "REF_PIPE"), "v1", id)
    }

    fn load_users(store: &RedbRefDataStore, stream: &RefStreamDefinition, name: &str) -> LoadOutcome {
        let map = MapDefinition::new(stream.clone(), "users");
        store
            .with_loader_unless_complete(stream, 1_000, &mut |loader: &mut dyn RefDataLoader| -> anyhow::Result<()> {
                loader.initialise(false)?;
                loader.put(&map, "user1", Value::text(name))?;
                loader.put(&map, "user2", Value::text("shared"))?;
                loader.complete_processing()?;
                Ok(())
            })
            .unwrap()
    }

    #[test]
    fn point_lookup_after_load() {
        let store = RedbRefDataStore::open_in_memory().unwrap();
        let s = stream(1);
        assert!(matches!(load_users(&store, &s, "Jane"), LoadOutcome::Loaded(_)));

        let map = MapDefinition::new(s.clone(), "users");
        let value = store
            .get_value(&map, &LookupKey::Exact("user1".into()))
            .unwrap();
        assert_eq!(value, Some(Value::text("Jane")));
        assert_eq!(
            store.get_value(&map, &LookupKey::Exact("nobody".into())).unwrap(),
            None
        );
        assert_eq!(store.key_value_entry_count().unwrap(), 2);
        assert_eq!(store.map_names(&s).unwrap(), vec!["USERS"]);
    }

    #[test]
    fn half_open_ranges() {
        let store: Arc<dyn RefDataStore> = Arc::new(RedbRefDataStore::open_in_memory().unwrap());
        let s = stream(1);
        let map = MapDefinition::new(s.clone(), "ranges");
        store
            .with_loader_unless_complete(&s, 0, &mut |loader: &mut dyn RefDataLoader| -> anyhow::Result<()> {
                loader.initialise(false)?;
                loader.put_range(&map, KeyRange::new(2, 30), Value::text("value1"))?;
                loader.put_range(&map, KeyRange::new(40, 41), Value::text("value2"))?;
                loader.put_range(&map, KeyRange::new(500, 2000), Value::text("value3"))?;
                loader.put_range(&map, KeyRange::new(3000, 3001), Value::text("value4"))?;
                loader.complete_processing()?;
                Ok(())
            })
            .unwrap();

        let text_at = |key: u64| {
            store
                .lookup_range(&map, key)
                .unwrap()
                .and_then(|proxy| proxy.supply_value().unwrap())
                .and_then(|value| value.as_text().map(str::to_string))
        };
        assert_eq!(text_at(1), None);
        assert_eq!(text_at(2).as_deref(), Some("value1"));
        assert_eq!(text_at(29).as_deref(), Some("value1"));
        assert_eq!(text_at(30), None);
        assert_eq!(text_at(40).as_deref(), Some("value2"));
        assert_eq!(text_at(1999).as_deref(), Some("value3"));
        assert_eq!(text_at(2000), None);
        assert_eq!(text_at(3000).as_deref(), Some("value4"));
        assert_eq!(store.range_value_entry_count().unwrap(), 4);
    }

    #[test]
    fn identical_values_are_stored_once() {
        let store = RedbRefDataStore::open_in_memory().unwrap();
        load_users(&store, &stream(1), "Jane");
        load_users(&store, &stream(2), "Jane");
        // "Jane" and "shared" across both streams.
        assert_eq!(store.distinct_value_count().unwrap(), 2);

        let summary = store.purge_stream(1).unwrap();
        assert_eq!(summary.streams_purged, 1);
        assert_eq!(summary.entries_purged, 2);
        assert_eq!(summary.values_dereferenced, 2);
        assert_eq!(summary.values_deleted, 0);
        assert_eq!(store.distinct_value_count().unwrap(), 2);

        let summary = store.purge_stream(2).unwrap();
        assert_eq!(summary.values_deleted, 2);
        assert_eq!(store.distinct_value_count().unwrap(), 0);
        assert_eq!(store.key_value_entry_count().unwrap(), 0);
    }

    #[test]
    fn entries_invisible_until_complete() {
        let store = RedbRefDataStore::open_in_memory().unwrap();
        let s = stream(1);
        let map = MapDefinition::new(s.clone(), "users");
        let outcome = store
            .with_loader_unless_complete(&s, 0, &mut |loader: &mut dyn RefDataLoader| -> anyhow::Result<()> {
                loader.initialise(false)?;
                loader.put(&map, "user1", Value::text("Jane"))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, LoadOutcome::Incomplete);
        assert!(!store.contains(&map, &LookupKey::Exact("user1".into())).unwrap());
        assert_eq!(RefDataStore::load_state(&store, &s).unwrap(), LoadState::NotLoaded);
    }

    #[test]
    fn processing_info_tracks_effective_time() {
        let store = RedbRefDataStore::open_in_memory().unwrap();
        let s = stream(1);
        load_users(&store, &s, "Jane");
        let info = store.processing_info(&s).unwrap().unwrap();
        assert_eq!(info.state, LoadState::Complete);
        assert_eq!(info.effective_time_ms, 1_000);
        assert!(info.last_accessed_time_ms >= info.create_time_ms);

        let listed = store.list_processing_info(Some(10)).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].stream, s);
    }

    #[test]
    fn purge_old_data_keeps_recent_streams() {
        let store = RedbRefDataStore::open_in_memory().unwrap();
        let s = stream(1);
        load_users(&store, &s, "Jane");
        let accessed = store.processing_info(&s).unwrap().unwrap().last_accessed_time_ms;

        let kept = store.purge_old_data(accessed, Duration::from_secs(60)).unwrap();
        assert!(kept.is_zero());
        assert!(store.is_complete(&s).unwrap());

        let purged = store
            .purge_old_data(accessed + 120_000, Duration::from_secs(60))
            .unwrap();
        assert_eq!(purged.streams_purged, 1);
        assert!(!store.is_complete(&s).unwrap());
    }

    #[test]
    fn purge_with_unbounded_age_keeps_everything() {
        let store = RedbRefDataStore::open_in_memory().unwrap();
        let s = stream(1);
        load_users(&store, &s, "Jane");
        let accessed = store.processing_info(&s).unwrap().unwrap().last_accessed_time_ms;

        let summary = store.purge_old_data(accessed + 1_000, Duration::MAX).unwrap();
        assert!(summary.is_zero());
        assert!(store.is_complete(&s).unwrap());
    }

    #[test]
    fn persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("refdata.redb");
        let s = stream(1);

        {
            let store = RedbRefDataStore::open(&db_path).unwrap();
            load_users(&store, &s, "Jane");
        }

        let store = RedbRefDataStore::open(&db_path).unwrap();
        assert!(store.is_complete(&s).unwrap());
        assert_eq!(load_users(&store, &s, "Other"), LoadOutcome::AlreadyComplete);
        let map = MapDefinition::new(s, "users");
        assert_eq!(
            store.get_value(&map, &LookupKey::Exact("user1".into())).unwrap(),
            Some(Value::text("Jane"))
        );
    }

    #[test]
    fn partial_loads_removed_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("refdata.redb");
        let s = stream(1);

        {
            let store = RedbRefDataStore::open(&db_path).unwrap();
            store.mark_loading(&s, 0, 0).unwrap();
            assert_eq!(LoadBackend::load_state(&store, &s).unwrap(), LoadState::Loading);
        }

        let store = RedbRefDataStore::open(&db_path).unwrap();
        assert_eq!(RefDataStore::load_state(&store, &s).unwrap(), LoadState::NotLoaded);
        assert!(matches!(load_users(&store, &s, "Jane"), LoadOutcome::Loaded(_)));
    }
}
