//! Load sessions and the load-at-most-once protocol shared by all backends.
//!
//! A load stages every entry in memory and publishes them in one step when
//! the loader reaches `complete_processing`, at the same moment the stream
//! becomes `Complete`. Readers therefore never see part of a stream. A body
//! that fails, returns early, or unwinds leaves the stream `NotLoaded`.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::Instant;

use refdata_core::time::now_ms;
use refdata_core::{KeyRange, MapDefinition, RefStreamDefinition, Value};
use refdata_core::types::RangeCheck;
use tracing::{debug, error, info, trace, warn};

use crate::error::{StoreError, StoreResult};
use crate::permits::LoadPermits;
use crate::types::{LoadOutcome, LoadState, LoadSummary, PutOutcome};

/// A load session bound to one stream definition.
///
/// Handed to the body of `with_loader_unless_complete`; the body calls
/// `initialise`, any number of puts, then `complete_processing`.
pub trait RefDataLoader {
    fn stream(&self) -> &RefStreamDefinition;

    fn effective_time_ms(&self) -> i64;

    /// Start the load. With `purge_existing`, any data already held for
    /// this stream is discarded when the load is published.
    fn initialise(&mut self, purge_existing: bool) -> StoreResult<()>;

    /// Stage an exact-key entry.
    fn put(&mut self, map: &MapDefinition, key: &str, value: Value) -> StoreResult<PutOutcome>;

    /// Stage a half-open `[from, to)` range entry. Malformed ranges are
    /// rejected individually without failing the load.
    fn put_range(&mut self, map: &MapDefinition, range: KeyRange, value: Value) -> StoreResult<PutOutcome>;

    /// Publish all staged entries and mark the stream `Complete`.
    fn complete_processing(&mut self) -> StoreResult<LoadSummary>;
}

/// Body run with exclusive access to a stream's loader.
pub type LoadBody<'a> = dyn FnMut(&mut dyn RefDataLoader) -> anyhow::Result<()> + 'a;

/// Backend hooks used by [`load_unless_complete`].
pub(crate) trait LoadBackend {
    fn backend_name(&self) -> &'static str;

    fn load_state(&self, stream: &RefStreamDefinition) -> StoreResult<LoadState>;

    /// Note that a complete stream was used.
    fn record_access(&self, stream: &RefStreamDefinition, now_ms: i64);

    /// Record the stream as `Loading`.
    fn mark_loading(&self, stream: &RefStreamDefinition, effective_time_ms: i64, now_ms: i64) -> StoreResult<()>;

    /// Atomically publish staged entries and mark the stream `Complete`.
    fn publish(&self, stream: &RefStreamDefinition, staged: StagedLoad, now_ms: i64) -> StoreResult<()>;

    /// Forget an unfinished load so the stream reads as `NotLoaded`.
    fn abandon(&self, stream: &RefStreamDefinition) -> StoreResult<()>;
}

/// Entries staged for one map.
#[derive(Debug, Default)]
pub(crate) struct StagedMap {
    pub keys: BTreeMap<String, Value>,
    /// Range start -> (exclusive end, value).
    pub ranges: BTreeMap<u64, (u64, Value)>,
}

/// Everything a load has staged so far.
#[derive(Debug, Default)]
pub(crate) struct StagedLoad {
    pub effective_time_ms: i64,
    pub purge_existing: bool,
    pub maps: BTreeMap<String, StagedMap>,
    pub summary: LoadSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    New,
    Initialised,
    Completed,
}

struct LoaderSession<'a, B: LoadBackend> {
    backend: &'a B,
    stream: RefStreamDefinition,
    effective_time_ms: i64,
    state: SessionState,
    staged: StagedLoad,
    started: Instant,
}

impl<'a, B: LoadBackend> LoaderSession<'a, B> {
    fn new(backend: &'a B, stream: RefStreamDefinition, effective_time_ms: i64) -> Self {
        Self {
            backend,
            stream,
            effective_time_ms,
            state: SessionState::New,
            staged: StagedLoad {
                effective_time_ms,
                ..StagedLoad::default()
            },
            started: Instant::now(),
        }
    }

    fn check_put(&mut self, map: &MapDefinition) -> StoreResult<()> {
        if self.state != SessionState::Initialised {
            return Err(StoreError::LoaderState(format!(
                "put on {} while loader is {:?}",
                self.stream, self.state
            )));
        }
        if map.stream != self.stream {
            return Err(StoreError::LoaderState(format!(
                "{map} does not belong to {}",
                self.stream
            )));
        }
        self.staged.summary.puts += 1;
        Ok(())
    }
}

impl<B: LoadBackend> RefDataLoader for LoaderSession<'_, B> {
    fn stream(&self) -> &RefStreamDefinition {
        &self.stream
    }

    fn effective_time_ms(&self) -> i64 {
        self.effective_time_ms
    }

    fn initialise(&mut self, purge_existing: bool) -> StoreResult<()> {
        if self.state != SessionState::New {
            return Err(StoreError::LoaderState(format!(
                "loader for {} already initialised",
                self.stream
            )));
        }
        self.backend
            .mark_loading(&self.stream, self.effective_time_ms, now_ms())?;
        self.staged.purge_existing = purge_existing;
        self.state = SessionState::Initialised;
        debug!(stream = %self.stream, purge_existing, "loader initialised");
        Ok(())
    }

    fn put(&mut self, map: &MapDefinition, key: &str, value: Value) -> StoreResult<PutOutcome> {
        self.check_put(map)?;
        trace!(%map, key, "put");
        let summary = &mut self.staged.summary;
        if value.is_null() {
            summary.nulls_ignored += 1;
            return Ok(PutOutcome::NullIgnored);
        }
        let staged_map = self
            .staged
            .maps
            .entry(map.map_name().to_string())
            .or_default();
        match staged_map.keys.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                summary.key_values += 1;
                Ok(PutOutcome::Staged)
            }
            Entry::Occupied(_) => {
                summary.duplicates_ignored += 1;
                Ok(PutOutcome::DuplicateIgnored)
            }
        }
    }

    fn put_range(&mut self, map: &MapDefinition, range: KeyRange, value: Value) -> StoreResult<PutOutcome> {
        self.check_put(map)?;
        trace!(%map, %range, "put range");
        let summary = &mut self.staged.summary;
        let (from, to) = match range.check() {
            Err(reason) => {
                warn!(%map, %range, %reason, "rejecting malformed range");
                summary.malformed_rejected += 1;
                return Ok(PutOutcome::Rejected(reason));
            }
            Ok(RangeCheck::Empty) => {
                summary.empty_ranges_ignored += 1;
                return Ok(PutOutcome::EmptyRangeIgnored);
            }
            Ok(RangeCheck::Valid { from, to }) => (from, to),
        };
        if value.is_null() {
            summary.nulls_ignored += 1;
            return Ok(PutOutcome::NullIgnored);
        }
        let staged_map = self
            .staged
            .maps
            .entry(map.map_name().to_string())
            .or_default();
        match staged_map.ranges.entry(from) {
            Entry::Vacant(slot) => {
                slot.insert((to, value));
                summary.ranges += 1;
                Ok(PutOutcome::Staged)
            }
            Entry::Occupied(_) => {
                summary.duplicates_ignored += 1;
                Ok(PutOutcome::DuplicateIgnored)
            }
        }
    }

    fn complete_processing(&mut self) -> StoreResult<LoadSummary> {
        if self.state != SessionState::Initialised {
            return Err(StoreError::LoaderState(format!(
                "complete_processing on {} while loader is {:?}",
                self.stream, self.state
            )));
        }
        let mut staged = std::mem::take(&mut self.staged);
        staged.summary.map_names = staged.maps.keys().cloned().collect();
        let summary = staged.summary.clone();

        self.backend.publish(&self.stream, staged, now_ms())?;
        self.state = SessionState::Completed;

        info!(
            store = self.backend.backend_name(),
            stream = %self.stream,
            puts = summary.puts,
            key_values = summary.key_values,
            ranges = summary.ranges,
            nulls_ignored = summary.nulls_ignored,
            duplicates_ignored = summary.duplicates_ignored,
            empty_ranges_ignored = summary.empty_ranges_ignored,
            malformed_rejected = summary.malformed_rejected,
            maps = %summary.map_names.join(", "),
            elapsed = ?self.started.elapsed(),
            "reference stream loaded"
        );
        Ok(summary)
    }
}

impl<B: LoadBackend> Drop for LoaderSession<'_, B> {
    fn drop(&mut self) {
        if self.state == SessionState::Initialised {
            if let Err(e) = self.backend.abandon(&self.stream) {
                warn!(stream = %self.stream, error = %e, "failed to clear unfinished load");
            }
        }
    }
}

/// Run `body` against a fresh loader unless `stream` is already complete.
///
/// Concurrent callers for the same stream serialise on its load permit and
/// re-check completeness once they hold it, so the body runs at most once
/// per successful load.
pub(crate) fn load_unless_complete<B: LoadBackend>(
    backend: &B,
    permits: &LoadPermits,
    stream: &RefStreamDefinition,
    effective_time_ms: i64,
    body: &mut LoadBody<'_>,
) -> StoreResult<LoadOutcome> {
    if backend.load_state(stream)? == LoadState::Complete {
        backend.record_access(stream, now_ms());
        return Ok(LoadOutcome::AlreadyComplete);
    }

    let _permit = permits.acquire(stream);
    if backend.load_state(stream)? == LoadState::Complete {
        debug!(%stream, "stream loaded by another thread while waiting");
        backend.record_access(stream, now_ms());
        return Ok(LoadOutcome::AlreadyComplete);
    }

    let mut session = LoaderSession::new(backend, stream.clone(), effective_time_ms);
    let result = body(&mut session);
    let state = session.state;
    let summary = session.staged.summary.clone();
    drop(session);

    match (result, state) {
        (Ok(()), SessionState::Completed) => Ok(LoadOutcome::Loaded(summary)),
        (Ok(()), _) => {
            warn!(%stream, "loader returned without completing; nothing published");
            Ok(LoadOutcome::Incomplete)
        }
        (Err(e), SessionState::Completed) => {
            warn!(%stream, error = %e, "loader failed after publishing its entries");
            Ok(LoadOutcome::Loaded(summary))
        }
        (Err(e), _) => {
            error!(%stream, error = %e, "reference data load failed");
            Err(StoreError::Load {
                stream: stream.to_string(),
                message: format!("{e:#}"),
            })
        }
    }
}
