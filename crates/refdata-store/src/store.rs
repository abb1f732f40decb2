//! The backend-agnostic store contract.

use std::sync::Arc;
use std::time::Duration;

use refdata_core::{MapDefinition, RefStreamDefinition, TypedBytes, Value};

use crate::error::StoreResult;
use crate::loader::LoadBody;
use crate::proxy::ValueProxy;
use crate::types::{
    LoadOutcome, LoadState, LookupKey, ProcessingInfo, PurgeSummary, StorageType, StreamRecord,
};

/// A reference data store: per-stream point and range maps with a
/// load-once-then-immutable lifecycle.
///
/// Reads against a stream that is not `Complete` see nothing. Missing
/// data is `Ok(None)` / `Ok(false)`, never an error.
pub trait RefDataStore: Send + Sync {
    fn storage_type(&self) -> StorageType;

    fn load_state(&self, stream: &RefStreamDefinition) -> StoreResult<LoadState>;

    fn is_complete(&self, stream: &RefStreamDefinition) -> StoreResult<bool> {
        Ok(self.load_state(stream)? == LoadState::Complete)
    }

    fn processing_info(&self, stream: &RefStreamDefinition) -> StoreResult<Option<ProcessingInfo>>;

    /// Known streams, most recently accessed first.
    fn list_processing_info(&self, limit: Option<usize>) -> StoreResult<Vec<StreamRecord>>;

    /// Run `body` with a loader for `stream` unless it is already complete.
    ///
    /// At most one caller per stream runs its body at a time; the others
    /// wait and then skip if the first one completed the stream.
    fn with_loader_unless_complete(
        &self,
        stream: &RefStreamDefinition,
        effective_time_ms: i64,
        body: &mut LoadBody<'_>,
    ) -> StoreResult<LoadOutcome>;

    fn contains(&self, map: &MapDefinition, key: &LookupKey) -> StoreResult<bool>;

    fn get_value(&self, map: &MapDefinition, key: &LookupKey) -> StoreResult<Option<Value>>;

    /// Push the stored bytes for `key` to `consumer` without materialising
    /// a [`Value`]. Returns false when there is no entry.
    fn consume_value_bytes(
        &self,
        map: &MapDefinition,
        key: &LookupKey,
        consumer: &mut dyn FnMut(TypedBytes<'_>),
    ) -> StoreResult<bool>;

    /// Map names loaded for a complete stream, sorted.
    fn map_names(&self, stream: &RefStreamDefinition) -> StoreResult<Vec<String>>;

    /// Remove complete streams not accessed within `purge_age` of `now_ms`.
    fn purge_old_data(&self, now_ms: i64, purge_age: Duration) -> StoreResult<PurgeSummary>;

    /// Remove every stream definition built on source stream `stream_id`.
    fn purge_stream(&self, stream_id: u64) -> StoreResult<PurgeSummary>;

    fn key_value_entry_count(&self) -> StoreResult<u64>;

    fn range_value_entry_count(&self) -> StoreResult<u64>;
}

/// Proxy-returning lookups for shared stores.
pub trait RefDataStoreExt {
    /// Exact-key lookup.
    fn lookup(&self, map: &MapDefinition, key: &str) -> StoreResult<Option<ValueProxy>>;

    /// Range lookup: the entry with `from <= key < to`.
    fn lookup_range(&self, map: &MapDefinition, key: u64) -> StoreResult<Option<ValueProxy>>;
}

impl RefDataStoreExt for Arc<dyn RefDataStore> {
    fn lookup(&self, map: &MapDefinition, key: &str) -> StoreResult<Option<ValueProxy>> {
        proxy_if_present(self, map, LookupKey::Exact(key.to_string()))
    }

    fn lookup_range(&self, map: &MapDefinition, key: u64) -> StoreResult<Option<ValueProxy>> {
        proxy_if_present(self, map, LookupKey::InRange(key))
    }
}

fn proxy_if_present(
    store: &Arc<dyn RefDataStore>,
    map: &MapDefinition,
    key: LookupKey,
) -> StoreResult<Option<ValueProxy>> {
    if store.contains(map, &key)? {
        Ok(Some(ValueProxy::new(Arc::clone(store), map.clone(), key)))
    } else {
        Ok(None)
    }
}
