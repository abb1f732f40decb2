//! redb table definitions for the reference data store.
//!
//! Fixed tables hold stream processing info, map uids, and the shared
//! value store. Each loaded map gets its own pair of sub-tables named
//! after its uid: `kv_{uid}` for exact keys and `range_{uid}` for
//! half-open key ranges.

use redb::TableDefinition;

/// Stream records (definition + processing info, JSON) keyed by stream table key.
pub const PROCESSING_INFO: TableDefinition<&str, &[u8]> = TableDefinition::new("processing_info");

/// Map uid keyed by `{stream_key}/{map_name}`.
pub const MAP_UIDS: TableDefinition<&str, u64> = TableDefinition::new("map_uids");

/// Store-wide counters keyed by name.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Encoded values keyed by the hex SHA-256 of the encoding.
pub const VALUES: TableDefinition<&str, &[u8]> = TableDefinition::new("values");

/// Reference counts for entries in [`VALUES`].
pub const VALUE_REFS: TableDefinition<&str, u64> = TableDefinition::new("value_refs");

/// Counter key for the next map uid.
pub const NEXT_MAP_UID: &str = "next_map_uid";

/// Name of the exact-key sub-table for a map uid.
pub fn key_value_table_name(uid: u64) -> String {
    format!("kv_{uid}")
}

/// Name of the range sub-table for a map uid.
pub fn range_table_name(uid: u64) -> String {
    format!("range_{uid}")
}

/// Exact key -> value hash.
pub fn key_value_table(name: &str) -> TableDefinition<'_, &'static str, &'static str> {
    TableDefinition::new(name)
}

/// Range start -> encoded `(to, value hash)`.
pub fn range_table(name: &str) -> TableDefinition<'_, u64, &'static [u8]> {
    TableDefinition::new(name)
}

/// Encode a range table value: big-endian `to` followed by the value hash.
pub fn encode_range_value(to: u64, value_hash: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + value_hash.len());
    buf.extend_from_slice(&to.to_be_bytes());
    buf.extend_from_slice(value_hash.as_bytes());
    buf
}

/// Decode a range table value into `(to, value hash)`.
pub fn decode_range_value(bytes: &[u8]) -> Option<(u64, &str)> {
    if bytes.len() < 8 {
        return None;
    }
    let (to_bytes, hash) = bytes.split_at(8);
    let to = u64::from_be_bytes(to_bytes.try_into().ok()?);
    let hash = std::str::from_utf8(hash).ok()?;
    Some((to, hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_value_encoding() {
        let encoded = encode_range_value(2000, "abc123");
        assert_eq!(decode_range_value(&encoded), Some((2000, "abc123")));
        assert_eq!(decode_range_value(&[1, 2, 3]), None);
    }

    #[test]
    fn sub_table_names() {
        assert_eq!(key_value_table_name(7), "kv_7");
        assert_eq!(range_table_name(7), "range_7");
    }
}
