//! Deferred handles to found values.

use std::fmt;
use std::sync::Arc;

use refdata_core::{MapDefinition, TypedBytes, Value};

use crate::error::StoreResult;
use crate::store::RefDataStore;
use crate::types::LookupKey;

/// One place a value was found: the store, the map and the key as it
/// matched there.
#[derive(Clone)]
struct ProxySource {
    store: Arc<dyn RefDataStore>,
    map: MapDefinition,
    key: LookupKey,
}

/// A handle to a value found in one or more stores.
///
/// Nothing is read until [`supply_value`](Self::supply_value) or
/// [`consume`](Self::consume) is called. A merged proxy tries its sources
/// in order and uses the first that still holds the entry. Each source
/// keeps the key it matched with, so an exact hit in one store and a
/// range hit in another can be merged.
#[derive(Clone)]
pub struct ValueProxy {
    key_text: String,
    /// Never empty.
    sources: Vec<ProxySource>,
}

impl ValueProxy {
    pub fn new(store: Arc<dyn RefDataStore>, map: MapDefinition, key: LookupKey) -> Self {
        Self {
            key_text: key.to_string(),
            sources: vec![ProxySource { store, map, key }],
        }
    }

    /// The key that was looked up, as text.
    pub fn key(&self) -> &str {
        &self.key_text
    }

    /// Key of the first source.
    pub fn lookup_key(&self) -> &LookupKey {
        &self.sources[0].key
    }

    /// Map name of the first source.
    pub fn map_name(&self) -> &str {
        self.sources[0].map.map_name()
    }

    /// Map definitions of every source, in the order they are tried.
    pub fn map_definitions(&self) -> impl Iterator<Item = &MapDefinition> {
        self.sources.iter().map(|source| &source.map)
    }

    /// Keys of every source, in the order they are tried.
    pub fn lookup_keys(&self) -> impl Iterator<Item = &LookupKey> {
        self.sources.iter().map(|source| &source.key)
    }

    /// Materialise the value from the first source that has it.
    pub fn supply_value(&self) -> StoreResult<Option<Value>> {
        for source in &self.sources {
            if let Some(value) = source.store.get_value(&source.map, &source.key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Push the stored bytes to `consumer`. Returns false when no source
    /// holds the entry any more.
    pub fn consume<F>(&self, mut consumer: F) -> StoreResult<bool>
    where
        F: FnMut(TypedBytes<'_>),
    {
        for source in &self.sources {
            if source
                .store
                .consume_value_bytes(&source.map, &source.key, &mut consumer)?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Combine with `other`; `self`'s sources are tried first.
    pub fn merge(mut self, other: ValueProxy) -> ValueProxy {
        self.sources.extend(other.sources);
        self
    }
}

impl fmt::Debug for ValueProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<String> = self
            .sources
            .iter()
            .map(|source| format!("{} [{}]", source.map, source.key))
            .collect();
        f.debug_struct("ValueProxy")
            .field("key", &self.key_text)
            .field("sources", &sources)
            .finish()
    }
}
