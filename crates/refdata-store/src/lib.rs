//! refdata-store — versioned reference data storage for refdata.
//!
//! Reference data arrives as independently loaded streams. Each stream is
//! loaded at most once through a [`RefDataLoader`] session and becomes
//! visible to readers all at once when the load completes.
//!
//! # Backends
//!
//! - [`RedbRefDataStore`]: persistent, backed by [redb](https://docs.rs/redb).
//!   Each map gets its own exact-key and range sub-tables; values are
//!   deduplicated by content hash.
//! - [`HeapRefDataStore`]: process-local keyspace per map.
//!
//! Both implement [`RefDataStore`], so callers hold an
//! `Arc<dyn RefDataStore>` and use [`RefDataStoreExt`] for proxy lookups.

pub mod error;
pub mod heap_store;
pub mod loader;
pub mod permits;
pub mod pool;
pub mod proxy;
pub mod redb_store;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use heap_store::HeapRefDataStore;
pub use loader::{LoadBody, RefDataLoader};
pub use permits::LoadPermits;
pub use pool::ByteBufferPool;
pub use proxy::ValueProxy;
pub use redb_store::RedbRefDataStore;
pub use store::{RefDataStore, RefDataStoreExt};
pub use types::*;
