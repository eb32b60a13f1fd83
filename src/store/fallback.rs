use super::{MemoryStore, Store, WindowCount};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Which backend a [`FallbackStore`] is currently serving from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// Distributed backend healthy and in use.
    Distributed,
    /// Distributed backend failed recently; serving from memory until the cooldown ends.
    Degraded,
    /// No distributed backend configured.
    MemoryOnly,
}

/// Distributed-first store that degrades to process memory.
///
/// A failed distributed call is retried once against memory and the
/// distributed backend is then skipped until `cooldown` elapses, so a dead
/// server is not hammered by every request. Errors from the distributed
/// backend never reach callers.
pub struct FallbackStore {
    primary: Option<Arc<dyn Store>>,
    memory: MemoryStore,
    cooldown: Duration,
    degraded_until: Mutex<Option<Instant>>,
    fallbacks: AtomicU64,
}

impl FallbackStore {
    pub fn new(primary: Arc<dyn Store>, memory: MemoryStore, cooldown: Duration) -> Self {
        Self {
            primary: Some(primary),
            memory,
            cooldown,
            degraded_until: Mutex::new(None),
            fallbacks: AtomicU64::new(0),
        }
    }

    pub fn memory_only(memory: MemoryStore) -> Self {
        Self {
            primary: None,
            memory,
            cooldown: Duration::ZERO,
            degraded_until: Mutex::new(None),
            fallbacks: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> StoreMode {
        if self.primary.is_none() {
            return StoreMode::MemoryOnly;
        }
        match *self.degraded_until.lock() {
            Some(until) if Instant::now() < until => StoreMode::Degraded,
            _ => StoreMode::Distributed,
        }
    }

    /// How many times the distributed backend has been abandoned for memory.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    fn active_primary(&self) -> Option<&Arc<dyn Store>> {
        let primary = self.primary.as_ref()?;
        let mut until = self.degraded_until.lock();
        match *until {
            Some(t) if Instant::now() < t => None,
            Some(_) => {
                *until = None;
                info!(backend = primary.name(), "cooldown over, retrying distributed store");
                Some(primary)
            }
            None => Some(primary),
        }
    }

    fn trip(&self, backend: &'static str, operation: &'static str, error: &Error) {
        let mut until = self.degraded_until.lock();
        let already_degraded = matches!(*until, Some(t) if Instant::now() < t);
        *until = Some(Instant::now() + self.cooldown);
        if !already_degraded {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
            warn!(
                backend,
                operation,
                cooldown_ms = self.cooldown.as_millis() as u64,
                error = %error,
                "distributed store unavailable, falling back to in-memory store"
            );
        }
    }

    async fn dispatch<'a, T, F, Fut>(&'a self, operation: &'static str, op: F) -> Result<T>
    where
        F: Fn(&'a dyn Store) -> Fut,
        Fut: Future<Output = Result<T>> + 'a,
    {
        if let Some(primary) = self.active_primary() {
            match op(primary.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(e) => self.trip(primary.name(), operation, &e),
            }
        }
        let memory: &'a dyn Store = &self.memory;
        op(memory).await
    }
}

#[async_trait]
impl Store for FallbackStore {
    async fn check_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
    ) -> Result<WindowCount> {
        self.dispatch("check_window", |s| s.check_window(key, now_ms, window, limit))
            .await
    }

    async fn increment_and_count(&self, key: &str, window: Duration) -> Result<u64> {
        self.dispatch("increment_and_count", |s| s.increment_and_count(key, window))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.dispatch("get", |s| s.get(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration, tags: &[String]) -> Result<()> {
        self.dispatch("set", |s| s.set(key, value, ttl, tags)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.dispatch("delete", |s| s.delete(key)).await
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<u64> {
        self.dispatch("delete_by_tag", |s| s.delete_by_tag(tag)).await
    }

    async fn ping(&self) -> Result<()> {
        self.dispatch("ping", |s| s.ping()).await
    }

    fn name(&self) -> &'static str {
        match self.mode() {
            StoreMode::Distributed => self.primary.as_ref().map(|p| p.name()).unwrap_or("memory"),
            StoreMode::Degraded | StoreMode::MemoryOnly => self.memory.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Distributed stand-in that always fails and counts attempts.
    #[derive(Default)]
    struct DownStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Store for DownStore {
        async fn check_window(&self, _: &str, _: u64, _: Duration, _: u64) -> Result<WindowCount> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::store_unavailable("down", "connection refused"))
        }
        async fn increment_and_count(&self, _: &str, _: Duration) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::store_unavailable("down", "connection refused"))
        }
        async fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::store_unavailable("down", "connection refused"))
        }
        async fn set(&self, _: &str, _: &[u8], _: Duration, _: &[String]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::store_unavailable("down", "connection refused"))
        }
        async fn delete(&self, _: &str) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::store_unavailable("down", "connection refused"))
        }
        async fn delete_by_tag(&self, _: &str) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::store_unavailable("down", "connection refused"))
        }
        fn name(&self) -> &'static str {
            "down"
        }
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_memory() {
        let down = Arc::new(DownStore::default());
        let store = FallbackStore::new(down.clone(), MemoryStore::new(), Duration::from_secs(30));

        store.set("k", b"v", Duration::from_secs(5), &[]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.mode(), StoreMode::Degraded);
        assert_eq!(store.fallback_count(), 1);
        // Sticky: only the first call reached the dead backend.
        assert_eq!(down.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_retried_after_cooldown() {
        let down = Arc::new(DownStore::default());
        let store = FallbackStore::new(down.clone(), MemoryStore::new(), Duration::from_millis(100));

        store.get("k").await.unwrap();
        store.get("k").await.unwrap();
        assert_eq!(down.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(store.mode(), StoreMode::Distributed);
        store.get("k").await.unwrap();
        assert_eq!(down.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.fallback_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_only_mode() {
        let store = FallbackStore::memory_only(MemoryStore::new());
        assert_eq!(store.mode(), StoreMode::MemoryOnly);
        assert_eq!(store.name(), "memory");
        assert_eq!(
            store.increment_and_count("c", Duration::from_secs(1)).await.unwrap(),
            1
        );
    }
}
