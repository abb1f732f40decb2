//! Memo of which maps each loaded stream contains.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use refdata_core::{RefStreamDefinition, normalise_map_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAvailability {
    /// The stream has not been seen complete yet.
    Unknown,
    Present,
    Absent,
}

/// Map names per complete stream, so streams lacking a map can be
/// skipped without touching the store.
#[derive(Default)]
pub struct MapNamesMemo {
    streams: RwLock<HashMap<RefStreamDefinition, Arc<BTreeSet<String>>>>,
}

impl MapNamesMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn availability(&self, stream: &RefStreamDefinition, map_name: &str) -> MapAvailability {
        let streams = self.streams.read().expect("map names lock");
        match streams.get(stream) {
            None => MapAvailability::Unknown,
            Some(names) if names.contains(&normalise_map_name(map_name)) => MapAvailability::Present,
            Some(_) => MapAvailability::Absent,
        }
    }

    pub fn is_known(&self, stream: &RefStreamDefinition) -> bool {
        self.streams
            .read()
            .expect("map names lock")
            .contains_key(stream)
    }

    /// Record the maps of a complete stream. An empty listing teaches
    /// nothing (the stream may have been purged under us) and is dropped.
    pub fn remember(&self, stream: &RefStreamDefinition, map_names: impl IntoIterator<Item = String>) {
        let names: BTreeSet<String> = map_names.into_iter().collect();
        if names.is_empty() {
            return;
        }
        self.streams
            .write()
            .expect("map names lock")
            .insert(stream.clone(), Arc::new(names));
    }

    pub fn forget(&self, stream: &RefStreamDefinition) {
        self.streams.write().expect("map names lock").remove(stream);
    }

    /// Forget every version of the streams with this id.
    pub fn forget_stream_id(&self, stream_id: u64) {
        self.streams
            .write()
            .expect("map names lock")
            .retain(|stream, _| stream.stream_id != stream_id);
    }

    pub fn clear(&self) {
        self.streams.write().expect("map names lock").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refdata_core::DocRef;

    #[test]
    fn availability_is_unknown_until_remembered() {
        let memo = MapNamesMemo::new();
        let stream = RefStreamDefinition::new(DocRef::pipeline("p", "P"), "1", 1);
        assert_eq!(memo.availability(&stream, "USERS"), MapAvailability::Unknown);

        memo.remember(&stream, vec!["USERS".to_string()]);
        assert_eq!(memo.availability(&stream, "users"), MapAvailability::Present);
        assert_eq!(memo.availability(&stream, "OTHER"), MapAvailability::Absent);

        memo.forget(&stream);
        assert!(!memo.is_known(&stream));
    }

    #[test]
    fn empty_listing_is_not_remembered() {
        let memo = MapNamesMemo::new();
        let stream = RefStreamDefinition::new(DocRef::pipeline("p", "P"), "1", 1);
        memo.remember(&stream, Vec::new());
        assert!(!memo.is_known(&stream));
        assert_eq!(memo.availability(&stream, "USERS"), MapAvailability::Unknown);
    }

    #[test]
    fn forget_stream_id_drops_all_versions() {
        let memo = MapNamesMemo::new();
        let v1 = RefStreamDefinition::new(DocRef::pipeline("p", "P"), "1", 5);
        let v2 = RefStreamDefinition::new(DocRef::pipeline("p", "P"), "2", 5);
        let other = RefStreamDefinition::new(DocRef::pipeline("p", "P"), "1", 6);
        for stream in [&v1, &v2, &other] {
            memo.remember(stream, vec!["M".to_string()]);
        }
        memo.forget_stream_id(5);
        assert!(!memo.is_known(&v1));
        assert!(!memo.is_known(&v2));
        assert!(memo.is_known(&other));
    }
}
