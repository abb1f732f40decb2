//! Candidate streams for a feed, ordered by effective time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata of one candidate source stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectiveMeta {
    pub id: u64,
    pub feed_name: String,
    pub type_name: String,
    /// Instant the stream's content became authoritative (ms since epoch).
    pub effective_ms: i64,
}

impl fmt::Display for EffectiveMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stream {} in feed '{}' effective {}",
            self.id,
            self.feed_name,
            crate::time::format_instant_ms(self.effective_ms)
        )
    }
}

/// Cache key for a feed's candidate streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectiveStreamKey {
    pub feed_name: String,
    pub type_name: String,
}

impl EffectiveStreamKey {
    pub fn new(feed_name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            feed_name: feed_name.into(),
            type_name: type_name.into(),
        }
    }
}

impl fmt::Display for EffectiveStreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.feed_name, self.type_name)
    }
}

/// Immutable snapshot of every candidate stream for one feed and type.
///
/// Candidates are held sorted by `(effective_ms, id)`, so when two streams
/// share an effective time the one with the higher id is selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveMetaSet {
    pub feed_name: String,
    pub type_name: String,
    metas: Vec<EffectiveMeta>,
}

impl EffectiveMetaSet {
    pub fn builder(feed_name: impl Into<String>, type_name: impl Into<String>) -> EffectiveMetaSetBuilder {
        EffectiveMetaSetBuilder {
            feed_name: feed_name.into(),
            type_name: type_name.into(),
            metas: Vec::new(),
        }
    }

    pub fn empty(feed_name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::builder(feed_name, type_name).build()
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    /// Candidates in ascending effective-time order.
    pub fn iter(&self) -> impl Iterator<Item = &EffectiveMeta> {
        self.metas.iter()
    }

    pub fn first(&self) -> Option<&EffectiveMeta> {
        self.metas.first()
    }

    pub fn last(&self) -> Option<&EffectiveMeta> {
        self.metas.last()
    }

    /// The candidate with the greatest effective time `<= event_time_ms`.
    ///
    /// Returns `None` when the event precedes every candidate. An event
    /// after the newest candidate selects that newest candidate.
    pub fn select(&self, event_time_ms: i64) -> Option<&EffectiveMeta> {
        let idx = self
            .metas
            .partition_point(|meta| meta.effective_ms <= event_time_ms);
        idx.checked_sub(1).map(|i| &self.metas[i])
    }
}

/// Builder that collects candidates and sorts them once.
pub struct EffectiveMetaSetBuilder {
    feed_name: String,
    type_name: String,
    metas: Vec<EffectiveMeta>,
}

impl EffectiveMetaSetBuilder {
    pub fn add(mut self, id: u64, effective_ms: i64) -> Self {
        self.metas.push(EffectiveMeta {
            id,
            feed_name: self.feed_name.clone(),
            type_name: self.type_name.clone(),
            effective_ms,
        });
        self
    }

    pub fn add_meta(mut self, meta: EffectiveMeta) -> Self {
        self.metas.push(meta);
        self
    }

    pub fn build(mut self) -> EffectiveMetaSet {
        self.metas.sort_by_key(|meta| (meta.effective_ms, meta.id));
        EffectiveMetaSet {
            feed_name: self.feed_name,
            type_name: self.type_name,
            metas: self.metas,
        }
    }
}
