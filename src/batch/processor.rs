use super::collector::{BatchAddResult, BatchConfig, BatchItem, BatchWindow};
use super::executor::{attribute, CallFailure};
use crate::pool::{ResourceManager, ResourcePool};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitDecision};
use crate::resilience::registry::BreakerRegistry;
use crate::upstream::BatchUpstream;
use crate::utils::Deadline;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub submitted: u64,
    pub batches: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retries: u64,
}

struct Pending<I, O> {
    item: BatchItem<I>,
    reply: oneshot::Sender<Result<O>>,
}

impl<I, O> Pending<I, O> {
    fn resolve(self, outcome: Result<O>) {
        // The caller may have given up (deadline); the result is discarded then.
        let _ = self.reply.send(outcome);
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    batches: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

struct ProcessorInner<M, U>
where
    M: ResourceManager,
    U: BatchUpstream<M::Resource>,
{
    cfg: BatchConfig,
    upstream: U,
    pool: ResourcePool<M>,
    breaker: Arc<CircuitBreaker>,
    window: Mutex<BatchWindow<Pending<U::Item, U::Output>>>,
    in_flight: Arc<Semaphore>,
    counters: Counters,
}

/// Aggregates submitted items into batched upstream calls.
///
/// A window is flushed when it reaches `max_batch_size` or when its first
/// item has waited `max_wait_time`. Each flush takes an in-flight slot,
/// checks the breaker, runs on a pooled handle, and hands each caller its
/// own result. Retryable failures are retried with jittered backoff, for
/// the failed items only. Every submitted item resolves.
pub struct BatchProcessor<M, U>
where
    M: ResourceManager,
    U: BatchUpstream<M::Resource>,
{
    inner: Arc<ProcessorInner<M, U>>,
}

impl<M, U> Clone for BatchProcessor<M, U>
where
    M: ResourceManager,
    U: BatchUpstream<M::Resource>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M, U> BatchProcessor<M, U>
where
    M: ResourceManager,
    U: BatchUpstream<M::Resource> + 'static,
{
    /// The breaker is looked up in `breakers` by the upstream's name, so
    /// batched and direct traffic to one provider share a circuit.
    pub fn new(cfg: BatchConfig, upstream: U, pool: ResourcePool<M>, breakers: &BreakerRegistry) -> Self {
        let breaker = breakers.get(upstream.name());
        let window = BatchWindow::new(cfg.max_batch_size);
        let in_flight = Arc::new(Semaphore::new(cfg.max_in_flight.max(1)));
        Self {
            inner: Arc::new(ProcessorInner {
                cfg,
                upstream,
                pool,
                breaker,
                window: Mutex::new(window),
                in_flight,
                counters: Counters::default(),
            }),
        }
    }

    pub fn upstream_name(&self) -> &str {
        self.inner.upstream.name()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    /// Queue `item` and wait for its individual result.
    ///
    /// If `deadline` passes first the caller gets [`Error::Timeout`]; the
    /// item may still be sent upstream with its batch.
    pub async fn submit(&self, item: U::Item, deadline: Deadline) -> Result<U::Output> {
        let (reply, rx) = oneshot::channel();
        let pending = Pending {
            item: BatchItem::new(item),
            reply,
        };
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let (added, full) = {
            let mut window = self.inner.window.lock();
            let added = window.push(pending);
            let full = added.should_flush().then(|| window.drain());
            (added, full)
        };
        match (added, full) {
            (_, Some(batch)) => self.spawn_flush(batch),
            (BatchAddResult::Added { opened: true, generation, .. }, None) => {
                self.arm_timer(generation)
            }
            _ => {}
        }

        let outcome = deadline.run("batch submit", rx).await?;
        outcome.map_err(|_| {
            Error::runtime_with_context(
                "batch dropped before resolving",
                ErrorContext::new().with_source("batch_processor"),
            )
        })?
    }

    /// Flush whatever is pending now and wait for that batch to finish.
    pub async fn flush_pending(&self) {
        let batch = self.inner.window.lock().drain();
        if !batch.is_empty() {
            Arc::clone(&self.inner).flush(batch).await;
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.window.lock().len()
    }

    pub fn stats(&self) -> BatchStats {
        let c = &self.inner.counters;
        BatchStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
        }
    }

    fn spawn_flush(&self, batch: Vec<Pending<U::Item, U::Output>>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.flush(batch));
    }

    fn arm_timer(&self, generation: u64) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.cfg.max_wait_time).await;
            let due = inner.window.lock().drain_generation(generation);
            if let Some(batch) = due {
                inner.flush(batch).await;
            }
        });
    }
}

impl<M, U> ProcessorInner<M, U>
where
    M: ResourceManager,
    U: BatchUpstream<M::Resource> + 'static,
{
    fn fail_all(&self, pending: Vec<Pending<U::Item, U::Output>>, error: &Error) {
        self.counters
            .failed
            .fetch_add(pending.len() as u64, Ordering::Relaxed);
        for p in pending {
            p.resolve(Err(error.replicate()));
        }
    }

    async fn flush(self: Arc<Self>, batch: Vec<Pending<U::Item, U::Output>>) {
        let upstream = self.upstream.name().to_string();
        let _slot = match Arc::clone(&self.in_flight).acquire_owned().await {
            Ok(slot) => slot,
            Err(_) => {
                let err = Error::runtime_with_context(
                    "batch processor closed",
                    ErrorContext::new().with_source("batch_processor"),
                );
                self.fail_all(batch, &err);
                return;
            }
        };
        self.counters.batches.fetch_add(1, Ordering::Relaxed);

        let mut pending = batch;
        let mut attempt: u32 = 0;
        while !pending.is_empty() {
            attempt += 1;
            let permit = match self.breaker.try_acquire() {
                CircuitDecision::Allowed(permit) => permit,
                CircuitDecision::Rejected { retry_after } => {
                    let err = Error::CircuitOpen {
                        upstream: upstream.clone(),
                        retry_after_ms: retry_after.as_millis() as u64,
                    };
                    self.fail_all(pending, &err);
                    return;
                }
            };

            let guard = match self.pool.acquire(Deadline::after(self.cfg.call_timeout)).await {
                Ok(guard) => guard,
                Err(e) => {
                    drop(permit);
                    warn!(upstream = %upstream, error = %e, "no pooled handle for batch");
                    self.fail_all(pending, &e);
                    return;
                }
            };

            let items: Vec<U::Item> = pending.iter().map(|p| p.item.data.clone()).collect();
            let call = tokio::time::timeout(
                self.cfg.call_timeout,
                self.upstream.call_batch(&*guard, &items),
            )
            .await;
            drop(guard);
            let results = match call {
                Ok(Ok(results)) => Ok(results),
                Ok(Err(e)) => Err(CallFailure::Upstream(e)),
                Err(_) => Err(CallFailure::TimedOut),
            };

            let outcomes = attribute(&upstream, attempt, pending, results);
            if outcomes.is_total_failure() {
                permit.failure();
            } else {
                permit.success();
            }
            debug!(
                upstream = %upstream,
                attempt,
                size = items.len(),
                succeeded = outcomes.success_count(),
                failed = outcomes.failure_count(),
                "batch attempt finished"
            );

            self.counters
                .succeeded
                .fetch_add(outcomes.delivered.len() as u64, Ordering::Relaxed);
            for (p, output) in outcomes.delivered {
                p.resolve(Ok(output));
            }
            self.counters
                .failed
                .fetch_add(outcomes.failed.len() as u64, Ordering::Relaxed);
            for (p, err) in outcomes.failed {
                p.resolve(Err(err));
            }

            if outcomes.retry.is_empty() {
                break;
            }
            if attempt > self.cfg.retry.max_retries {
                self.counters
                    .failed
                    .fetch_add(outcomes.retry.len() as u64, Ordering::Relaxed);
                for (p, err) in outcomes.retry {
                    p.resolve(Err(err));
                }
                break;
            }
            self.counters
                .retries
                .fetch_add(outcomes.retry.len() as u64, Ordering::Relaxed);
            tokio::time::sleep(self.cfg.retry.delay_for(attempt)).await;
            pending = outcomes.retry.into_iter().map(|(p, _)| p).collect();
        }
    }
}

/// Type-erased submission for the middleware: JSON in, JSON out.
#[async_trait]
pub trait BatchSubmitter: Send + Sync {
    fn upstream(&self) -> &str;

    /// Circuit guarding the upstream's batched calls.
    fn breaker(&self) -> &Arc<CircuitBreaker>;

    fn pending(&self) -> usize;

    fn stats(&self) -> BatchStats;

    async fn submit_value(&self, payload: Value, deadline: Deadline) -> Result<Value>;
}

#[async_trait]
impl<M, U> BatchSubmitter for BatchProcessor<M, U>
where
    M: ResourceManager,
    U: BatchUpstream<M::Resource, Item = Value, Output = Value> + 'static,
{
    fn upstream(&self) -> &str {
        self.upstream_name()
    }

    fn breaker(&self) -> &Arc<CircuitBreaker> {
        BatchProcessor::breaker(self)
    }

    fn pending(&self) -> usize {
        BatchProcessor::pending(self)
    }

    fn stats(&self) -> BatchStats {
        BatchProcessor::stats(self)
    }

    async fn submit_value(&self, payload: Value, deadline: Deadline) -> Result<Value> {
        self.submit(payload, deadline).await
    }
}
