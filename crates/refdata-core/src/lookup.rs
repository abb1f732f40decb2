//! Lookup requests, including nested ("chained") map paths.
//!
//! A map path such as `CARD_TO_USER/USER_TO_LOCATION` resolves the key in
//! the first map, then uses the resulting text as the key into the next.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::time::format_instant_ms;
use crate::types::normalise_map_name;

/// Separator between hops in a nested map path.
pub const MAP_PATH_SEPARATOR: char = '/';

/// One resolution request: an ordered, non-empty map path, a key, and the
/// event time the value must have been valid at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LookupIdentifier {
    map_path: Vec<String>,
    key: String,
    event_time_ms: i64,
}

impl LookupIdentifier {
    /// Split `path` on `/` into the hops of the lookup.
    pub fn parse(path: &str, key: impl Into<String>, event_time_ms: i64) -> CoreResult<Self> {
        let map_path: Vec<String> = path
            .split(MAP_PATH_SEPARATOR)
            .map(normalise_map_name)
            .collect();
        if map_path.iter().any(String::is_empty) {
            return Err(CoreError::InvalidLookup(format!(
                "map path '{path}' contains an empty map name"
            )));
        }
        Ok(Self {
            map_path,
            key: key.into(),
            event_time_ms,
        })
    }

    /// The map resolved by this hop.
    pub fn primary_map_name(&self) -> &str {
        &self.map_path[0]
    }

    /// The map the next hop would resolve, if any.
    pub fn secondary_map_name(&self) -> Option<&str> {
        self.map_path.get(1).map(String::as_str)
    }

    pub fn map_path(&self) -> &[String] {
        &self.map_path
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn event_time_ms(&self) -> i64 {
        self.event_time_ms
    }

    /// True when more hops follow the primary map.
    pub fn is_map_nested(&self) -> bool {
        self.map_path.len() > 1
    }

    /// The identifier for the next hop, keyed by the previous hop's value.
    /// Returns `None` on the last hop.
    pub fn nested(&self, next_key: impl Into<String>) -> Option<Self> {
        if !self.is_map_nested() {
            return None;
        }
        Some(Self {
            map_path: self.map_path[1..].to_vec(),
            key: next_key.into(),
            event_time_ms: self.event_time_ms,
        })
    }

    /// The key as an unsigned integer, for range map lookups.
    pub fn key_as_u64(&self) -> Option<u64> {
        self.key.trim().parse().ok()
    }
}

impl fmt::Display for LookupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "map: '{}', key: '{}', time: {}",
            self.map_path.join("/"),
            self.key,
            format_instant_ms(self.event_time_ms)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_map_is_not_nested() {
        let id = LookupIdentifier::parse("USER_MAP", "user1", 0).unwrap();
        assert_eq!(id.primary_map_name(), "USER_MAP");
        assert!(id.secondary_map_name().is_none());
        assert!(!id.is_map_nested());
        assert!(id.nested("x").is_none());
    }

    #[test]
    fn nested_path_walks_hops_in_order() {
        let id = LookupIdentifier::parse("A/B/C", "k1", 42).unwrap();
        assert_eq!(id.primary_map_name(), "A");
        assert_eq!(id.secondary_map_name(), Some("B"));

        let second = id.nested("k2").unwrap();
        assert_eq!(second.primary_map_name(), "B");
        assert_eq!(second.key(), "k2");
        assert_eq!(second.event_time_ms(), 42);
        assert!(second.is_map_nested());

        let third = second.nested("k3").unwrap();
        assert_eq!(third.map_path(), &["C".to_string()]);
        assert!(!third.is_map_nested());
    }

    #[test]
    fn empty_segments_are_rejected() {
        assert!(LookupIdentifier::parse("", "k", 0).is_err());
        assert!(LookupIdentifier::parse("A//B", "k", 0).is_err());
        assert!(LookupIdentifier::parse("A/", "k", 0).is_err());
    }

    #[test]
    fn map_names_are_normalised() {
        let id = LookupIdentifier::parse("card_to_user/user_to_loc", "k", 0).unwrap();
        assert_eq!(id.primary_map_name(), "CARD_TO_USER");
    }

    #[test]
    fn numeric_keys_parse() {
        assert_eq!(LookupIdentifier::parse("R", "1999", 0).unwrap().key_as_u64(), Some(1999));
        assert_eq!(LookupIdentifier::parse("R", "abc", 0).unwrap().key_as_u64(), None);
        assert_eq!(LookupIdentifier::parse("R", "-1", 0).unwrap().key_as_u64(), None);
    }
}
