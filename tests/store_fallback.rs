mod common;

use async_trait::async_trait;
use common::LogCapture;
use resilience_core::store::{FallbackStore, MemoryStore, Store, StoreMode, WindowCount};
use resilience_core::utils::now_millis;
use resilience_core::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A distributed backend that can be taken down and brought back.
#[derive(Default)]
struct Flaky {
    inner: MemoryStore,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl Flaky {
    fn guard(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::store_unavailable("redis", "connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for Flaky {
    async fn check_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
    ) -> Result<WindowCount> {
        self.guard()?;
        self.inner.check_window(key, now_ms, window, limit).await
    }

    async fn increment_and_count(&self, key: &str, ttl: Duration) -> Result<u64> {
        self.guard()?;
        self.inner.increment_and_count(key, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.guard()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration, tags: &[String]) -> Result<()> {
        self.guard()?;
        self.inner.set(key, value, ttl, tags).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.guard()?;
        self.inner.delete(key).await
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<u64> {
        self.guard()?;
        self.inner.delete_by_tag(tag).await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[tokio::test(start_paused = true)]
async fn test_outage_and_recovery() {
    let primary = Arc::new(Flaky::default());
    let store = FallbackStore::new(primary.clone(), MemoryStore::new(), Duration::from_secs(30));
    let ttl = Duration::from_secs(600);

    store.set("profile:1", b"ana", ttl, &[]).await.unwrap();
    assert_eq!(store.mode(), StoreMode::Distributed);
    assert_eq!(primary.inner.value_count(), 1);

    primary.down.store(true, Ordering::SeqCst);
    assert_eq!(store.get("profile:1").await.unwrap(), None);
    store.set("profile:2", b"bo", ttl, &[]).await.unwrap();
    assert_eq!(store.get("profile:2").await.unwrap(), Some(b"bo".to_vec()));
    assert_eq!(store.mode(), StoreMode::Degraded);
    assert_eq!(primary.calls.load(Ordering::SeqCst), 2);

    primary.down.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(store.get("profile:2").await.unwrap(), Some(b"bo".to_vec()));
    assert_eq!(primary.calls.load(Ordering::SeqCst), 2);

    tokio::time::advance(Duration::from_secs(21)).await;
    assert_eq!(store.get("profile:1").await.unwrap(), Some(b"ana".to_vec()));
    assert_eq!(store.mode(), StoreMode::Distributed);
    assert_eq!(store.fallback_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_window_counts_restart_in_memory_during_outage() {
    let primary = Arc::new(Flaky::default());
    let store = FallbackStore::new(primary.clone(), MemoryStore::new(), Duration::from_secs(30));
    let window = Duration::from_secs(60);

    for _ in 0..3 {
        store.check_window("rl:user:1", now_millis(), window, 3).await.unwrap();
    }
    let full = store.check_window("rl:user:1", now_millis(), window, 3).await.unwrap();
    assert!(!full.recorded);

    primary.down.store(true, Ordering::SeqCst);
    let during = store.check_window("rl:user:1", now_millis(), window, 3).await.unwrap();
    assert!(during.recorded);
    assert_eq!(store.memory().window_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_warns_once_per_outage() {
    let logs = LogCapture::default();
    let _guard = logs.install();
    let primary = Arc::new(Flaky::default());
    primary.down.store(true, Ordering::SeqCst);
    let store = FallbackStore::new(primary.clone(), MemoryStore::new(), Duration::from_secs(30));

    for _ in 0..5 {
        store.set("k", b"v", Duration::from_secs(60), &[]).await.unwrap();
    }
    let needle = "falling back to in-memory store";
    assert_eq!(logs.count(needle), 1);
    let out = logs.contents();
    assert!(out.contains("WARN"), "{out}");
    assert!(out.contains("backend=\"redis\"") || out.contains("backend=redis"), "{out}");

    tokio::time::advance(Duration::from_secs(31)).await;
    store.get("k").await.unwrap();
    assert_eq!(logs.count(needle), 2);
    assert_eq!(store.fallback_count(), 2);
}
