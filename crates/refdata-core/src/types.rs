//! Identity types for reference streams, maps, and pipeline references.
//!
//! All identities are immutable value types. Their `table_key()` methods
//! build the composite string keys used by the stores; the zero-padded
//! stream id keeps keys for one pipeline version in numeric order.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Reference to a document (pipeline, feed) held by an external catalogue.
///
/// Equality and hashing use the type and uuid only; the name is a
/// display label that may change without changing identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocRef {
    #[serde(rename = "type")]
    pub type_name: String,
    pub uuid: String,
    pub name: String,
}

impl DocRef {
    pub fn new(type_name: impl Into<String>, uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            uuid: uuid.into(),
            name: name.into(),
        }
    }

    /// A pipeline document reference.
    pub fn pipeline(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(Self::PIPELINE_TYPE, uuid, name)
    }

    /// A feed document reference.
    pub fn feed(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(Self::FEED_TYPE, uuid, name)
    }

    pub const PIPELINE_TYPE: &'static str = "Pipeline";
    pub const FEED_TYPE: &'static str = "Feed";
}

impl PartialEq for DocRef {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.uuid == other.uuid
    }
}

impl Eq for DocRef {}

impl Hash for DocRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_name.hash(state);
        self.uuid.hash(state);
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' ({})", self.type_name, self.name, self.uuid)
    }
}

/// One versioned snapshot of source data: the pipeline that produced it,
/// the pipeline version, and the source stream id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefStreamDefinition {
    pub pipeline: DocRef,
    pub pipeline_version: String,
    pub stream_id: u64,
}

impl RefStreamDefinition {
    pub fn new(pipeline: DocRef, pipeline_version: impl Into<String>, stream_id: u64) -> Self {
        Self {
            pipeline,
            pipeline_version: pipeline_version.into(),
            stream_id,
        }
    }

    /// Composite key `{len}:{pipeline_uuid}:{len}:{version}:{stream_id}`.
    ///
    /// The text parts are length-prefixed so a ':' inside a uuid or version
    /// cannot make two definitions share a key.
    pub fn table_key(&self) -> String {
        let uuid = &self.pipeline.uuid;
        let version = &self.pipeline_version;
        format!(
            "{}:{uuid}:{}:{version}:{:020}",
            uuid.len(),
            version.len(),
            self.stream_id
        )
    }
}

impl fmt::Display for RefStreamDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stream {} (pipeline '{}' v{})",
            self.stream_id, self.pipeline.name, self.pipeline_version
        )
    }
}

/// A named map inside a stream's payload. Map names are case-normalised
/// to upper case so loads and lookups agree regardless of spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapDefinition {
    pub stream: RefStreamDefinition,
    map_name: String,
}

impl MapDefinition {
    pub fn new(stream: RefStreamDefinition, map_name: &str) -> Self {
        Self {
            stream,
            map_name: normalise_map_name(map_name),
        }
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    /// Composite key `{stream_key}/{map_name}`.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.stream.table_key(), self.map_name)
    }
}

impl fmt::Display for MapDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map '{}' in {}", self.map_name, self.stream)
    }
}

/// Canonical form of a map name.
pub fn normalise_map_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// A configured candidate source of reference data for a consuming
/// pipeline. References are tried in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineReference {
    pub pipeline: DocRef,
    pub feed: DocRef,
    pub stream_type: String,
}

impl PipelineReference {
    /// Stream type of references that read the data attached to the event
    /// stream being processed rather than an effective reference stream.
    pub const CONTEXT_STREAM_TYPE: &'static str = "Context";

    pub fn new(pipeline: DocRef, feed: DocRef, stream_type: impl Into<String>) -> Self {
        Self {
            pipeline,
            feed,
            stream_type: stream_type.into(),
        }
    }

    pub fn is_context(&self) -> bool {
        self.stream_type.trim() == Self::CONTEXT_STREAM_TYPE
    }

    /// Check the reference is fully formed.
    pub fn validate(&self) -> Result<(), String> {
        if self.pipeline.uuid.trim().is_empty() {
            return Err("pipeline reference has no pipeline uuid".to_string());
        }
        if self.feed.uuid.trim().is_empty() || self.feed.name.trim().is_empty() {
            return Err(format!("pipeline reference to '{}' has no feed", self.pipeline.name));
        }
        if self.stream_type.trim().is_empty() {
            return Err(format!(
                "pipeline reference to '{}' has no stream type",
                self.pipeline.name
            ));
        }
        Ok(())
    }
}

impl fmt::Display for PipelineReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pipeline '{}', feed '{}', type '{}'",
            self.pipeline.name, self.feed.name, self.stream_type
        )
    }
}

/// A half-open key interval `[from, to)` as supplied by a loader.
///
/// Bounds are signed so malformed input can be represented and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    pub from: i64,
    pub to: i64,
}

/// Result of checking a [`KeyRange`] before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeCheck {
    /// `0 <= from < to`, stored as unsigned bounds.
    Valid { from: u64, to: u64 },
    /// `from == to`; well-formed but matches nothing.
    Empty,
}

impl KeyRange {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    /// Validate the bounds. Returns the rejection reason for malformed ranges.
    pub fn check(&self) -> Result<RangeCheck, String> {
        if self.from < 0 || self.to < 0 {
            return Err(format!("range {self} has a negative bound"));
        }
        if self.from > self.to {
            return Err(format!("range {self} has from > to"));
        }
        if self.from == self.to {
            return Ok(RangeCheck::Empty);
        }
        Ok(RangeCheck::Valid {
            from: self.from as u64,
            to: self.to as u64,
        })
    }

    /// Half-open membership test.
    pub fn contains(&self, key: u64) -> bool {
        match self.check() {
            Ok(RangeCheck::Valid { from, to }) => from <= key && key < to,
            _ => false,
        }
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: u64) -> RefStreamDefinition {
        RefStreamDefinition::new(DocRef::pipeline("p-uuid", "REF_PIPE"), "1", id)
    }

    #[test]
    fn doc_ref_identity_ignores_name() {
        let a = DocRef::feed("uuid-1", "FEED_A");
        let b = DocRef::feed("uuid-1", "FEED_RENAMED");
        assert_eq!(a, b);
        assert_ne!(a, DocRef::pipeline("uuid-1", "FEED_A"));
    }

    #[test]
    fn stream_keys_sort_numerically() {
        assert!(stream(9).table_key() < stream(10).table_key());
    }

    #[test]
    fn stream_definitions_differ_by_version() {
        let v1 = stream(1);
        let mut v2 = stream(1);
        v2.pipeline_version = "2".to_string();
        assert_ne!(v1, v2);
        assert_ne!(v1.table_key(), v2.table_key());
    }

    #[test]
    fn separators_in_parts_do_not_collide() {
        let a = RefStreamDefinition::new(DocRef::pipeline("a:b", "P"), "c", 1);
        let b = RefStreamDefinition::new(DocRef::pipeline("a", "P"), "b:c", 1);
        assert_ne!(a, b);
        assert_ne!(a.table_key(), b.table_key());

        // A stream's map prefix never matches another stream's maps.
        let prefix = format!("{}/", a.table_key());
        assert!(!MapDefinition::new(b, "M").table_key().starts_with(&prefix));
    }

    #[test]
    fn map_names_are_normalised() {
        let a = MapDefinition::new(stream(1), "user_to_loc");
        let b = MapDefinition::new(stream(1), " USER_TO_LOC ");
        assert_eq!(a, b);
        assert_eq!(a.map_name(), "USER_TO_LOC");
        assert!(a.table_key().ends_with("/USER_TO_LOC"));
    }

    #[test]
    fn range_check_classifies_bounds() {
        assert_eq!(
            KeyRange::new(2, 30).check(),
            Ok(RangeCheck::Valid { from: 2, to: 30 })
        );
        assert_eq!(KeyRange::new(5, 5).check(), Ok(RangeCheck::Empty));
        assert!(KeyRange::new(30, 2).check().is_err());
        assert!(KeyRange::new(-1, 2).check().is_err());
    }

    #[test]
    fn range_contains_is_half_open() {
        let range = KeyRange::new(2, 30);
        assert!(!range.contains(1));
        assert!(range.contains(2));
        assert!(range.contains(29));
        assert!(!range.contains(30));
        assert!(!KeyRange::new(4, 4).contains(4));
    }

    #[test]
    fn pipeline_reference_validation() {
        let ok = PipelineReference::new(
            DocRef::pipeline("p", "PIPE"),
            DocRef::feed("f", "FEED"),
            "Reference",
        );
        assert!(ok.validate().is_ok());
        assert!(!ok.is_context());

        let mut context = ok.clone();
        context.stream_type = PipelineReference::CONTEXT_STREAM_TYPE.to_string();
        assert!(context.is_context());

        let mut no_type = ok.clone();
        no_type.stream_type = String::new();
        assert!(no_type.validate().is_err());

        let mut no_feed = ok;
        no_feed.feed = DocRef::feed("", "");
        assert!(no_feed.validate().is_err());
    }
}
