//! Domain types for the reference data store.

use std::fmt;
use std::time::Duration;

use refdata_core::RefStreamDefinition;
use serde::{Deserialize, Serialize};

/// Lifecycle of one stream definition in a store.
///
/// `NotLoaded` is never persisted; it is reported for unknown streams.
/// A stream only moves forward to `Complete` and never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    NotLoaded,
    Loading,
    Complete,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadState::NotLoaded => "NOT_LOADED",
            LoadState::Loading => "LOADING",
            LoadState::Complete => "COMPLETE",
        };
        f.write_str(s)
    }
}

/// Persisted bookkeeping for a stream definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingInfo {
    pub create_time_ms: i64,
    pub last_accessed_time_ms: i64,
    pub effective_time_ms: i64,
    pub state: LoadState,
}

/// A stream definition together with its processing info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub stream: RefStreamDefinition,
    pub info: ProcessingInfo,
}

/// Which backend a store is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    /// Embedded memory-mapped B-tree file (redb).
    Redb,
    /// Process-local keyspace per map.
    Heap,
}

/// The key half of a lookup: an exact key or a point inside a range map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    Exact(String),
    InRange(u64),
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKey::Exact(k) => f.write_str(k),
            LookupKey::InRange(k) => write!(f, "{k}"),
        }
    }
}

/// What happened to a single `put` on a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// Staged for publication when the load completes.
    Staged,
    /// The key (or range start) was already staged; the first value is kept.
    DuplicateIgnored,
    /// Null values are not stored.
    NullIgnored,
    /// A zero-width range matches nothing and is not stored.
    EmptyRangeIgnored,
    /// The entry was malformed and rejected; the load continues.
    Rejected(String),
}

/// Counters describing one completed load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub puts: u64,
    pub key_values: u64,
    pub ranges: u64,
    pub nulls_ignored: u64,
    pub duplicates_ignored: u64,
    pub empty_ranges_ignored: u64,
    pub malformed_rejected: u64,
    pub map_names: Vec<String>,
}

/// Result of `with_loader_unless_complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The stream was already complete; the body was not run.
    AlreadyComplete,
    /// The body ran and reached `complete_processing`.
    Loaded(LoadSummary),
    /// The body returned without completing; nothing was published.
    Incomplete,
}

impl LoadOutcome {
    /// True when the stream is complete after the call.
    pub fn is_available(&self) -> bool {
        !matches!(self, LoadOutcome::Incomplete)
    }
}

/// Counters describing a purge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub streams_purged: u64,
    pub maps_purged: u64,
    pub entries_purged: u64,
    pub values_deleted: u64,
    pub values_dereferenced: u64,
}

impl PurgeSummary {
    pub fn add(&mut self, other: PurgeSummary) {
        self.streams_purged += other.streams_purged;
        self.maps_purged += other.maps_purged;
        self.entries_purged += other.entries_purged;
        self.values_deleted += other.values_deleted;
        self.values_dereferenced += other.values_dereferenced;
    }

    pub fn is_zero(&self) -> bool {
        *self == PurgeSummary::default()
    }
}

/// Access time before which a complete stream counts as old. Ages too
/// large for an `i64` of millis put the cutoff at the start of time.
pub(crate) fn purge_cutoff(now_ms: i64, purge_age: Duration) -> i64 {
    let age_ms = i64::try_from(purge_age.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(age_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_state_serializes_snake_case() {
        let json = serde_json::to_string(&LoadState::Complete).unwrap();
        assert_eq!(json, "\"complete\"");
    }

    #[test]
    fn incomplete_outcome_is_unavailable() {
        assert!(LoadOutcome::AlreadyComplete.is_available());
        assert!(LoadOutcome::Loaded(LoadSummary::default()).is_available());
        assert!(!LoadOutcome::Incomplete.is_available());
    }

    #[test]
    fn purge_summary_accumulates() {
        let mut total = PurgeSummary::default();
        assert!(total.is_zero());
        total.add(PurgeSummary {
            streams_purged: 1,
            maps_purged: 2,
            entries_purged: 10,
            values_deleted: 3,
            values_dereferenced: 7,
        });
        total.add(PurgeSummary {
            streams_purged: 1,
            ..Default::default()
        });
        assert_eq!(total.streams_purged, 2);
        assert_eq!(total.entries_purged, 10);
    }

    #[test]
    fn huge_purge_age_never_moves_cutoff_forward() {
        let now = 1_700_000_000_000;
        assert_eq!(purge_cutoff(now, Duration::from_secs(60)), now - 60_000);
        assert!(purge_cutoff(now, Duration::MAX) <= 0);
        assert!(purge_cutoff(now, Duration::from_millis(u64::MAX)) <= 0);
        assert_eq!(purge_cutoff(i64::MIN, Duration::from_secs(1)), i64::MIN);
    }
}
