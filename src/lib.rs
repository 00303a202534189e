//! credcache - Bounded hybrid cache for credential records
//!
//! This library keeps small, hot records in a fast remote cache and falls
//! back to a durable store on a miss:
//! - Fast store: Redis (or the in-process Moka store), the hot path
//! - Durable store: pluggable persistent backend, the authoritative copy
//!
//! The cache supports:
//! - Cache-aside reads with warm-up of the fast store on a miss
//! - Write-through persistence with explicit partial-failure reporting
//! - Selective field reads and merges over a flattened field map
//! - LRU eviction under memory pressure plus an inactivity timeout,
//!   touching only the fast store

mod access_tracker;
mod codec;
mod config;
mod durable_store;
mod error;
mod eviction;
mod fast_store;
mod hybrid_cache;
mod memory_store;
mod record;
mod redis_store;

#[cfg(test)]
mod test_support;

pub use access_tracker::{AccessMetadata, AccessTracker};
pub use codec::{Codec, JsonCodec};
pub use config::{CacheConfig, EVICTION_HEADROOM_PERCENT, EvictionConfig};
pub use durable_store::{DurableStore, MemoryDurableStore};
pub use error::{CacheError, CacheResult, StoreError, StoreSide};
pub use eviction::{EvictionManager, EvictionStats, MemoryUsage, SweepReport};
pub use fast_store::FastStore;
pub use hybrid_cache::{HybridCache, SetOptions};
pub use memory_store::MemoryFastStore;
pub use record::{FieldId, Record};
pub use redis_store::{RedisFastStore, RedisStoreConfig};

// Re-export async_trait for store implementors
pub use async_trait::async_trait;
