//! Process-wide components, built once at startup and shared by reference.

use crate::cache::{CacheKeyGenerator, TieredCache};
use crate::config::ResilienceConfig;
use crate::pool::{PoolStats, ResourceManager, ResourcePool};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::rate_limiter::RateLimiter;
use crate::resilience::registry::BreakerRegistry;
use crate::store::{FallbackStore, MemoryStore, RedisStore, Store};
use crate::Result;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// A pool the context can report on and shut down, whatever its resource type.
pub trait ManagedPool: Send + Sync {
    fn stats(&self) -> PoolStats;

    fn shutdown(&self);
}

impl<M: ResourceManager> ManagedPool for ResourcePool<M> {
    fn stats(&self) -> PoolStats {
        ResourcePool::stats(self)
    }

    fn shutdown(&self) {
        ResourcePool::shutdown(self)
    }
}

/// Store, limiter, breakers and cache for one process.
///
/// Construct one per process (or per test) and hand it to the
/// [`Middleware`](super::Middleware). Must be created inside a Tokio runtime
/// because it starts the memory store's sweeper.
pub struct ResilienceContext {
    config: ResilienceConfig,
    store: Arc<FallbackStore>,
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    cache: Arc<TieredCache>,
    key_generator: CacheKeyGenerator,
    pools: RwLock<Vec<Arc<dyn ManagedPool>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ResilienceContext {
    pub fn from_config(config: ResilienceConfig) -> Result<Self> {
        config.validate()?;
        let memory = MemoryStore::new();
        let sweeper = memory.spawn_sweeper(Duration::from_millis(config.store.sweep_interval_ms.max(1)));
        let store = match config.store.redis_url.as_deref() {
            Some(url) => {
                let redis = RedisStore::open(
                    url,
                    config.store.key_prefix.clone(),
                    Duration::from_millis(config.store.operation_timeout_ms),
                )?;
                info!(backend = "redis", "distributed store configured");
                FallbackStore::new(
                    Arc::new(redis),
                    memory,
                    Duration::from_millis(config.store.fallback_cooldown_ms),
                )
            }
            None => {
                info!("no distributed store configured, using process memory");
                FallbackStore::memory_only(memory)
            }
        };
        Ok(Self::assemble(config, Arc::new(store), Some(sweeper)))
    }

    /// Build around an existing store, e.g. a [`FallbackStore`] over a test double.
    pub fn with_store(config: ResilienceConfig, store: Arc<FallbackStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, store, None))
    }

    fn assemble(
        config: ResilienceConfig,
        store: Arc<FallbackStore>,
        sweeper: Option<JoinHandle<()>>,
    ) -> Self {
        let shared: Arc<dyn Store> = store.clone();
        let limiter = Arc::new(RateLimiter::new(shared.clone(), config.rate_limiter_config()));
        let breakers = Arc::new(config.breaker_registry());
        let cache = Arc::new(TieredCache::new(config.cache_config(), shared));
        let key_generator = config.cache.key_generator();
        Self {
            config,
            store,
            limiter,
            breakers,
            cache,
            key_generator,
            pools: RwLock::new(Vec::new()),
            sweeper: Mutex::new(sweeper),
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<FallbackStore> {
        &self.store
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn breaker(&self, upstream: &str) -> Arc<CircuitBreaker> {
        self.breakers.get(upstream)
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn key_generator(&self) -> &CacheKeyGenerator {
        &self.key_generator
    }

    /// Track `pool` for signals and shutdown.
    pub fn register_pool(&self, pool: Arc<dyn ManagedPool>) {
        self.pools.write().push(pool);
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools.read().iter().map(|p| p.stats()).collect()
    }

    /// Stop background tasks and close registered pools.
    pub fn shutdown(&self) {
        self.store.memory().shutdown();
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        for pool in self.pools.read().iter() {
            pool.shutdown();
        }
        info!("resilience context shut down");
    }
}
