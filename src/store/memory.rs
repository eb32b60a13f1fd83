//! In-process store: sliding-window logs in a sharded map, values behind one lock.

use super::{Store, WindowCount};
use crate::utils::now_millis;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct WindowLog {
    /// Sorted ascending.
    stamps: VecDeque<u64>,
    window_ms: u64,
}

impl WindowLog {
    fn new(window_ms: u64) -> Self {
        Self {
            stamps: VecDeque::new(),
            window_ms,
        }
    }

    fn prune(&mut self, now_ms: u64) {
        let floor = now_ms.saturating_sub(self.window_ms);
        while matches!(self.stamps.front(), Some(&t) if t < floor) {
            self.stamps.pop_front();
        }
    }

    fn record(&mut self, now_ms: u64) {
        // Clocks can step backwards; keep the log ordered anyway.
        let pos = self.stamps.partition_point(|&t| t <= now_ms);
        self.stamps.insert(pos, now_ms);
    }

    fn is_stale(&self, now_ms: u64) -> bool {
        self.stamps
            .back()
            .map(|&last| last.saturating_add(self.window_ms) < now_ms)
            .unwrap_or(true)
    }
}

#[derive(Debug)]
struct ValueEntry {
    data: Vec<u8>,
    expires_at: Instant,
    tags: Vec<String>,
}

impl ValueEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Values and the tag index share one lock so that tag invalidation is
/// observed by readers as a single step.
#[derive(Debug, Default)]
struct ValueTable {
    entries: HashMap<String, ValueEntry>,
    tags: HashMap<String, HashSet<String>>,
}

impl ValueTable {
    fn remove(&mut self, key: &str) -> Option<ValueEntry> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        Some(entry)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    windows: DashMap<String, WindowLog>,
    values: RwLock<ValueTable>,
}

impl MemoryInner {
    fn sweep(&self) -> usize {
        let now_ms = now_millis();
        let before = self.windows.len();
        self.windows.retain(|_, log| {
            log.prune(now_ms);
            !log.is_stale(now_ms)
        });
        let mut removed = before.saturating_sub(self.windows.len());

        let now = Instant::now();
        let mut table = self.values.write();
        let expired: Vec<String> = table
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if table.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }
}

/// Process-local [`Store`].
///
/// Window logs are garbage-collected once every timestamp has left the
/// window; values once their TTL passes. Both happen lazily on access and
/// in bulk from the sweeper started by [`MemoryStore::spawn_sweeper`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
    shutdown: CancellationToken,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the periodic sweep. Stops when [`MemoryStore::shutdown`] is called.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = inner.sweep();
                        if removed > 0 {
                            debug!(removed, "memory store sweep");
                        }
                    }
                }
            }
        })
    }

    /// Run one sweep immediately; returns the number of entries removed.
    pub fn sweep_now(&self) -> usize {
        self.inner.sweep()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Number of live window logs (for diagnostics and tests).
    pub fn window_count(&self) -> usize {
        self.inner.windows.len()
    }

    /// Number of stored values, including not-yet-swept expired ones.
    pub fn value_count(&self) -> usize {
        self.inner.values.read().entries.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn check_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
    ) -> Result<WindowCount> {
        let window_ms = window.as_millis() as u64;
        // The entry guard holds the shard lock: this is the per-key critical section.
        let mut log = self
            .inner
            .windows
            .entry(key.to_string())
            .or_insert_with(|| WindowLog::new(window_ms));
        log.window_ms = window_ms;
        log.prune(now_ms);
        let recorded = (log.stamps.len() as u64) < limit;
        if recorded {
            log.record(now_ms);
        }
        Ok(WindowCount {
            count: log.stamps.len() as u64,
            recorded,
            oldest_ms: log.stamps.front().copied(),
        })
    }

    async fn increment_and_count(&self, key: &str, window: Duration) -> Result<u64> {
        let now_ms = now_millis();
        let window_ms = window.as_millis() as u64;
        let mut log = self
            .inner
            .windows
            .entry(key.to_string())
            .or_insert_with(|| WindowLog::new(window_ms));
        log.window_ms = window_ms;
        log.prune(now_ms);
        log.record(now_ms);
        Ok(log.stamps.len() as u64)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let table = self.inner.values.read();
        Ok(table
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.data.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration, tags: &[String]) -> Result<()> {
        let mut table = self.inner.values.write();
        table.remove(key);
        for tag in tags {
            table
                .tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        table.entries.insert(
            key.to_string(),
            ValueEntry {
                data: value.to_vec(),
                expires_at: Instant::now() + ttl,
                tags: tags.to_vec(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.inner.values.write().remove(key);
        let window_removed = self.inner.windows.remove(key).is_some();
        Ok(removed.is_some() || window_removed)
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<u64> {
        let mut table = self.inner.values.write();
        let Some(keys) = table.tags.remove(tag) else {
            return Ok(0);
        };
        let mut removed = 0u64;
        for key in keys {
            if table.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
