//! # Response Caching Module
//!
//! Two-tier response cache placed in front of the upstreams so repeated
//! identical requests are answered without being rate limited, batched or
//! sent anywhere.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TieredCache`] | Local LRU tier in front of the shared [`Store`](crate::store::Store) |
//! | [`CacheConfig`] | TTLs, local capacity, entry size limit, key prefix |
//! | [`CacheKeyGenerator`] | Stable keys from normalised JSON payloads |
//! | [`CacheStats`] | Hits per tier, misses, writes, invalidations |
//!
//! ```rust
//! use resilience_core::cache::{CacheConfig, CacheKeyGenerator, TieredCache};
//! use resilience_core::store::MemoryStore;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> resilience_core::Result<()> {
//! let cache = TieredCache::new(CacheConfig::new(), Arc::new(MemoryStore::new()));
//! let key = CacheKeyGenerator::new().generate("search", &json!({"q": "perro"}));
//! cache.set(&key, &json!(["dog"]), None, &["lang:es".to_string()]).await?;
//! assert!(cache.get(&key).await.is_some());
//! cache.invalidate_tag("lang:es").await;
//! # Ok(())
//! # }
//! ```

mod key;
mod local;
mod manager;

pub use key::{CacheKey, CacheKeyGenerator};
pub use manager::{CacheConfig, CacheHit, CacheStats, CacheTier, Invalidation, TieredCache};
