//! Persistent list cache.
//!
//! This module holds the two stores the sync engine writes to:
//! - the item cache, materialized list rows ordered per scope
//! - the remote key store, per-item page boundary offsets
//!
//! Both are partitioned by [`ScopeKey`] and written together in atomic
//! batches so readers never see items without their remote keys.

mod storage;
mod traits;

pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CachedItem, Cacheable, ItemId, ListPurpose, Listed, RemoteKey, ScopeKey};
