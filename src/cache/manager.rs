//! Two-tier cache manager.

use super::key::CacheKey;
use super::local::LocalTier;
use crate::store::Store;
use crate::utils::now_millis;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl: Duration,
    /// Upper bound on how long an entry lives in the local tier.
    pub local_ttl: Duration,
    pub local_capacity: usize,
    pub max_entry_size: usize,
    /// Prepended to every key written to the distributed tier.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300),
            local_ttl: Duration::from_secs(30),
            local_capacity: 1000,
            max_entry_size: 1024 * 1024,
            key_prefix: "cache:".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_local_ttl(mut self, ttl: Duration) -> Self {
        self.local_ttl = ttl;
        self
    }

    pub fn with_local_capacity(mut self, capacity: usize) -> Self {
        self.local_capacity = capacity;
        self
    }

    pub fn with_max_entry_size(mut self, bytes: usize) -> Self {
        self.max_entry_size = bytes;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Local,
    Distributed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub value: Value,
    pub tier: CacheTier,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Invalidation {
    pub distributed: u64,
    pub local: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub local_hits: u64,
    pub distributed_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.local_hits + self.distributed_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    local_hits: AtomicU64,
    distributed_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            distributed_hits: self.distributed_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// What the distributed tier holds for one key.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    value: Value,
    #[serde(default)]
    tags: Vec<String>,
    expires_at_ms: u64,
}

/// Local LRU in front of the shared [`Store`].
///
/// Reads check the local tier, then the store, promoting store hits. Writes
/// go to both. Tag invalidation clears the store before the local tier and
/// excludes readers while it runs, so a reader never sees a half-invalidated
/// tag or re-promotes an entry that is being removed.
///
/// Store failures never reach the caller: a failed read is a miss and a
/// failed write is logged.
pub struct TieredCache {
    config: CacheConfig,
    store: Arc<dyn Store>,
    local: LocalTier,
    gate: RwLock<()>,
    stats: AtomicStats,
}

impl TieredCache {
    pub fn new(config: CacheConfig, store: Arc<dyn Store>) -> Self {
        let local = LocalTier::new(config.local_capacity, config.local_ttl);
        Self {
            config,
            store,
            local,
            gate: RwLock::new(()),
            stats: AtomicStats::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn storage_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CacheHit> {
        if !self.config.enabled {
            return None;
        }
        let _read = self.gate.read().await;
        let local_key = key.as_string();
        if let Some(value) = self.local.get(&local_key) {
            self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            return Some(CacheHit {
                value,
                tier: CacheTier::Local,
            });
        }

        let bytes = match self.store.get(&self.storage_key(key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, treating as miss");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        let envelope: CacheEnvelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable cache entry");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        let now = now_millis();
        if envelope.expires_at_ms <= now {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let remaining = Duration::from_millis(envelope.expires_at_ms - now);
        self.local
            .insert(&local_key, envelope.value.clone(), &envelope.tags, remaining);
        self.stats.distributed_hits.fetch_add(1, Ordering::Relaxed);
        Some(CacheHit {
            value: envelope.value,
            tier: CacheTier::Distributed,
        })
    }

    /// Write `value` to both tiers. `ttl` defaults to the configured TTL.
    pub async fn set(
        &self,
        key: &CacheKey,
        value: &Value,
        ttl: Option<Duration>,
        tags: &[String],
    ) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let envelope = CacheEnvelope {
            value: value.clone(),
            tags: tags.to_vec(),
            expires_at_ms: now_millis().saturating_add(ttl.as_millis() as u64),
        };
        let data = serde_json::to_vec(&envelope)?;
        if data.len() > self.config.max_entry_size {
            debug!(key = %key, size = data.len(), "entry too large to cache");
            return Ok(());
        }

        let _read = self.gate.read().await;
        if let Err(e) = self
            .store
            .set(&self.storage_key(key), &data, ttl, tags)
            .await
        {
            warn!(key = %key, error = %e, "distributed cache write failed");
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.local.insert(&key.as_string(), envelope.value, tags, ttl);
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn delete(&self, key: &CacheKey) -> bool {
        let _write = self.gate.write().await;
        let distributed = match self.store.delete(&self.storage_key(key)).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key = %key, error = %e, "distributed cache delete failed");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        };
        let local = self.local.remove(&key.as_string());
        distributed || local
    }

    /// Remove every entry tagged `tag` from both tiers, distributed first.
    pub async fn invalidate_tag(&self, tag: &str) -> Invalidation {
        let _write = self.gate.write().await;
        let distributed = match self.store.delete_by_tag(tag).await {
            Ok(n) => n,
            Err(e) => {
                warn!(tag, error = %e, "distributed tag invalidation failed");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                0
            }
        };
        let local = self.local.invalidate_tag(tag);
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(tag, distributed, local, "cache tag invalidated");
        Invalidation { distributed, local }
    }

    pub fn clear_local(&self) {
        self.local.clear();
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn cache(store: Arc<MemoryStore>) -> TieredCache {
        TieredCache::new(
            CacheConfig::new()
                .with_ttl(Duration::from_secs(60))
                .with_local_ttl(Duration::from_secs(10)),
            store,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_then_read_hits_local() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let key = CacheKey::new("k");
        cache.set(&key, &json!({"a": 1}), None, &[]).await.unwrap();
        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.value, json!({"a": 1}));
        assert_eq!(hit.tier, CacheTier::Local);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distributed_hit_is_promoted() {
        let store = Arc::new(MemoryStore::new());
        let writer = cache(store.clone());
        let reader = cache(store);
        let key = CacheKey::new("k");
        writer.set(&key, &json!("v"), None, &[]).await.unwrap();

        assert_eq!(reader.get(&key).await.unwrap().tier, CacheTier::Distributed);
        assert_eq!(reader.get(&key).await.unwrap().tier, CacheTier::Local);
        let stats = reader.stats();
        assert_eq!((stats.distributed_hits, stats.local_hits), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let key = CacheKey::new("k");
        cache
            .set(&key, &json!(1), Some(Duration::from_secs(2)), &[])
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_tag_clears_both_tiers() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(store.clone());
        let tagged = CacheKey::new("tagged");
        let plain = CacheKey::new("plain");
        cache
            .set(&tagged, &json!(1), None, &["deck:9".to_string()])
            .await
            .unwrap();
        cache.set(&plain, &json!(2), None, &[]).await.unwrap();

        let removed = cache.invalidate_tag("deck:9").await;
        assert_eq!(removed, Invalidation { distributed: 1, local: 1 });
        assert!(cache.get(&tagged).await.is_none());
        assert_eq!(cache.get(&plain).await.unwrap().value, json!(2));
        assert!(store.get("cache:tagged").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_is_inert() {
        let cache = TieredCache::new(
            CacheConfig::new().with_enabled(false),
            Arc::new(MemoryStore::new()),
        );
        let key = CacheKey::new("k");
        cache.set(&key, &json!(1), None, &[]).await.unwrap();
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_entry_is_skipped() {
        let cache = TieredCache::new(
            CacheConfig::new().with_max_entry_size(16),
            Arc::new(MemoryStore::new()),
        );
        let key = CacheKey::new("k");
        cache
            .set(&key, &json!("a value that is far too long"), None, &[])
            .await
            .unwrap();
        assert!(cache.get(&key).await.is_none());
    }
}
