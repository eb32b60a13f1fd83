//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use resilience_core::batch::{BatchConfig, BatchProcessor};
use resilience_core::pool::{PoolConfig, ResourceManager, ResourcePool};
use resilience_core::resilience::BreakerRegistry;
use resilience_core::store::{Store, WindowCount};
use resilience_core::upstream::{BatchUpstream, Upstream, UpstreamError};
use resilience_core::{Deadline, Error, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upstream that echoes its payload, or fails while `failing` is set.
pub struct ScriptedUpstream {
    name: String,
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
    pub latency: Duration,
}

impl ScriptedUpstream {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            latency: Duration::ZERO,
        })
    }

    pub fn slow(name: &str, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            latency,
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, payload: Value, deadline: Deadline) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing.load(Ordering::SeqCst);
        let latency = self.latency;
        let work = async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if failing {
                Err(UpstreamError::retryable("provider returned 503"))
            } else {
                Ok(json!({ "echo": payload }))
            }
        };
        let outcome = deadline.run("scripted upstream", work).await?;
        outcome.map_err(|e| e.into_error(&self.name, 1))
    }
}

/// Store whose every operation fails, like an unreachable Redis.
pub struct UnreachableStore;

fn refused() -> Error {
    Error::store_unavailable("redis", "connection refused")
}

#[async_trait]
impl Store for UnreachableStore {
    async fn check_window(&self, _: &str, _: u64, _: Duration, _: u64) -> Result<WindowCount> {
        Err(refused())
    }

    async fn increment_and_count(&self, _: &str, _: Duration) -> Result<u64> {
        Err(refused())
    }

    async fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
        Err(refused())
    }

    async fn set(&self, _: &str, _: &[u8], _: Duration, _: &[String]) -> Result<()> {
        Err(refused())
    }

    async fn delete(&self, _: &str) -> Result<bool> {
        Err(refused())
    }

    async fn delete_by_tag(&self, _: &str) -> Result<u64> {
        Err(refused())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Pooled client handle for batch tests.
pub struct Clients;

#[async_trait]
impl ResourceManager for Clients {
    type Resource = ();

    async fn create(&self) -> Result<()> {
        Ok(())
    }
}

/// Batch provider answering `{"q": ...}` items with `{"hits": [q]}`.
/// Items carrying `"reject": true` fail permanently.
#[derive(Default)]
pub struct SearchBatch {
    pub batches: Mutex<Vec<usize>>,
}

#[async_trait]
impl BatchUpstream<()> for SearchBatch {
    type Item = Value;
    type Output = Value;

    fn name(&self) -> &str {
        "image-search"
    }

    async fn call_batch(
        &self,
        _client: &(),
        items: &[Value],
    ) -> std::result::Result<Vec<std::result::Result<Value, UpstreamError>>, UpstreamError> {
        self.batches.lock().push(items.len());
        Ok(items
            .iter()
            .map(|item| {
                if item["reject"].as_bool() == Some(true) {
                    Err(UpstreamError::permanent("query rejected"))
                } else {
                    Ok(json!({ "hits": [item["q"].clone()] }))
                }
            })
            .collect())
    }
}

pub fn search_processor(
    cfg: BatchConfig,
    breakers: &BreakerRegistry,
) -> BatchProcessor<Clients, SearchBatch> {
    BatchProcessor::new(
        cfg,
        SearchBatch::default(),
        ResourcePool::new("image-search", Clients, PoolConfig::new().with_min_size(0)),
        breakers,
    )
}

/// Collects formatted log lines emitted on the current thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route this thread's events here until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
