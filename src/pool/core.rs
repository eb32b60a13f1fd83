use super::manager::{PoolConfig, QueueMode, ResourceManager};
use crate::utils::Deadline;
use crate::{Error, ErrorContext, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub idle: usize,
    pub in_use: usize,
    pub total: usize,
    pub max_size: usize,
    pub waiters: usize,
    pub created: u64,
    pub retired: u64,
}

struct Pooled<R> {
    id: Uuid,
    resource: R,
    created_at: Instant,
    last_used_at: Instant,
    use_count: u64,
}

struct PoolInner<M: ResourceManager> {
    name: String,
    manager: M,
    cfg: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Pooled<M::Resource>>>,
    // Signalled whenever a handle lands in `idle` or a slot frees up.
    returned: Notify,
    total: AtomicUsize,
    waiters: AtomicUsize,
    created: AtomicU64,
    retired: AtomicU64,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl<M: ResourceManager> PoolInner<M> {
    fn is_worn_out(&self, item: &Pooled<M::Resource>) -> bool {
        item.use_count >= self.cfg.max_usage_count
    }

    fn is_stale(&self, item: &Pooled<M::Resource>, now: Instant) -> bool {
        now.duration_since(item.last_used_at) >= self.cfg.idle_timeout
    }

    /// Claim room for one more resource without exceeding `max_size`.
    fn reserve_slot(&self, limit: usize) -> bool {
        self.total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| (t < limit).then_some(t + 1))
            .is_ok()
    }

    /// Build a resource into a slot already claimed with `reserve_slot`.
    /// The claim is given back if creation fails or is cancelled.
    async fn create(&self) -> Result<Pooled<M::Resource>> {
        let mut claim = SlotClaim {
            total: &self.total,
            kept: false,
        };
        let resource = self.manager.create().await?;
        claim.kept = true;
        self.created.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        Ok(Pooled {
            id: Uuid::new_v4(),
            resource,
            created_at: now,
            last_used_at: now,
            use_count: 0,
        })
    }

    fn put_idle(&self, item: Pooled<M::Resource>) {
        self.idle.lock().push_back(item);
        self.returned.notify_waiters();
    }

    /// An idle handle is ready or a new one may be created.
    fn has_room(&self) -> bool {
        !self.idle.lock().is_empty() || self.total.load(Ordering::Acquire) < self.cfg.max_size
    }

    fn retire(&self, item: Pooled<M::Resource>, reason: &'static str) {
        self.total.fetch_sub(1, Ordering::AcqRel);
        self.retired.fetch_add(1, Ordering::Relaxed);
        self.returned.notify_waiters();
        debug!(
            pool = %self.name,
            resource_id = %item.id,
            uses = item.use_count,
            age_ms = item.created_at.elapsed().as_millis() as u64,
            reason,
            "resource retired"
        );
    }

    fn check_in(&self, mut item: Pooled<M::Resource>, invalid: bool) {
        if invalid {
            self.retire(item, "invalidated");
        } else if self.closed.load(Ordering::Acquire) {
            self.retire(item, "pool closed");
        } else if self.is_worn_out(&item) {
            self.retire(item, "max usage reached");
        } else {
            item.last_used_at = Instant::now();
            self.put_idle(item);
        }
    }

    async fn maintain(&self) {
        let now = Instant::now();
        let pending = self.idle.lock().len();
        // One resource out of the idle list at a time, so acquirers keep access to the rest.
        for _ in 0..pending {
            let Some(item) = self.idle.lock().pop_front() else {
                break;
            };
            if self.is_worn_out(&item) {
                self.retire(item, "max usage reached");
            } else if self.is_stale(&item, now) {
                self.retire(item, "idle timeout");
            } else if !self.manager.validate(&item.resource).await {
                self.retire(item, "failed health check");
            } else {
                self.put_idle(item);
            }
        }
        self.replenish().await;
    }

    async fn replenish(&self) {
        while !self.closed.load(Ordering::Acquire) && self.reserve_slot(self.cfg.min_size) {
            match self.create().await {
                Ok(item) => self.put_idle(item),
                Err(e) => {
                    warn!(pool = %self.name, error = %e, "failed to create replacement resource");
                    break;
                }
            }
        }
    }
}

/// Bounded pool of expensive handles.
///
/// A semaphore with `max_size` permits guards checkout, so a handle is
/// only ever held by one [`PoolGuard`]. Dropping the guard returns the
/// handle, including when the holder's future is cancelled.
pub struct ResourcePool<M: ResourceManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ResourceManager> Clone for ResourcePool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SlotClaim<'a> {
    total: &'a AtomicUsize,
    kept: bool,
}

impl Drop for SlotClaim<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.total.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

struct WaiterSlot<'a>(&'a AtomicUsize);

impl Drop for WaiterSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<M: ResourceManager> ResourcePool<M> {
    pub fn new(name: impl Into<String>, manager: M, cfg: PoolConfig) -> Self {
        let max = cfg.max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                manager,
                permits: Arc::new(Semaphore::new(max)),
                cfg: PoolConfig { max_size: max, ..cfg },
                idle: Mutex::new(VecDeque::new()),
                returned: Notify::new(),
                total: AtomicUsize::new(0),
                waiters: AtomicUsize::new(0),
                created: AtomicU64::new(0),
                retired: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.cfg
    }

    /// Warm the pool up to `min_size`.
    pub async fn initialize(&self) -> Result<()> {
        while self.inner.reserve_slot(self.inner.cfg.min_size) {
            let item = self.inner.create().await?;
            self.inner.put_idle(item);
        }
        Ok(())
    }

    /// Start periodic health checks. Stops on [`ResourcePool::shutdown`].
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let interval = inner.cfg.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => inner.maintain().await,
                }
            }
        })
    }

    /// Run one maintenance pass now.
    pub async fn run_maintenance(&self) {
        self.inner.maintain().await;
    }

    /// Stop maintenance, refuse new checkouts and drop idle resources.
    /// Handles still checked out are dropped when returned.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.shutdown.cancel();
        self.inner.permits.close();
        self.inner.returned.notify_waiters();
        let drained: Vec<_> = self.inner.idle.lock().drain(..).collect();
        for item in drained {
            self.inner.retire(item, "pool closed");
        }
    }

    fn closed_error(&self) -> Error {
        Error::runtime_with_context(
            "resource pool is shut down",
            ErrorContext::new().with_source(self.inner.name.clone()),
        )
    }

    fn exhausted(&self) -> Error {
        Error::PoolExhausted {
            pool: self.inner.name.clone(),
            waiters: self.inner.waiters.load(Ordering::Acquire),
        }
    }

    /// Map an expired wait to the caller's timeout when their deadline was
    /// the binding one, otherwise to pool exhaustion.
    fn expired_wait(&self, caller: Deadline, pool: Deadline, timeout: Error) -> Error {
        let caller_wins = match (caller.instant(), pool.instant()) {
            (Some(caller), Some(pool)) => caller <= pool,
            _ => false,
        };
        if caller_wins {
            timeout
        } else {
            self.exhausted()
        }
    }

    async fn wait_for_permit(
        &self,
        deadline: Deadline,
        pool_deadline: Deadline,
    ) -> Result<OwnedSemaphorePermit> {
        match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(tokio::sync::TryAcquireError::Closed) => return Err(self.closed_error()),
            Err(tokio::sync::TryAcquireError::NoPermits) => {}
        }

        let max_waiters = match self.inner.cfg.queue {
            QueueMode::FailFast => return Err(self.exhausted()),
            QueueMode::Queue { max_waiters } => max_waiters,
        };
        let joined = self
            .inner
            .waiters
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                (w < max_waiters).then_some(w + 1)
            })
            .is_ok();
        if !joined {
            return Err(self.exhausted());
        }
        let _slot = WaiterSlot(&self.inner.waiters);

        match deadline
            .min(pool_deadline)
            .run("pool acquire", Arc::clone(&self.inner.permits).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(self.closed_error()),
            Err(timeout) => Err(self.expired_wait(deadline, pool_deadline, timeout)),
        }
    }

    /// Check out a handle, waiting up to `acquire_timeout` (or `deadline`,
    /// whichever is sooner).
    pub async fn acquire(&self, deadline: Deadline) -> Result<PoolGuard<M>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }
        let pool_deadline = Deadline::after(self.inner.cfg.acquire_timeout);
        let permit = self.wait_for_permit(deadline, pool_deadline).await?;
        let now = Instant::now();

        let mut item = loop {
            let popped = self.inner.idle.lock().pop_back();
            match popped {
                Some(item) if self.inner.is_worn_out(&item) => {
                    self.inner.retire(item, "max usage reached");
                }
                Some(item) if self.inner.is_stale(&item, now) => {
                    self.inner.retire(item, "idle timeout");
                }
                Some(item) => break item,
                None if self.inner.reserve_slot(self.inner.cfg.max_size) => {
                    break deadline.run("pool create", self.inner.create()).await??;
                }
                // Every slot is taken by a handle under health check or being
                // replenished. Wait for one to come back, bounded like the permit wait.
                None => {
                    let returned = self.inner.returned.notified();
                    if self.inner.has_room() {
                        continue;
                    }
                    let waited = deadline
                        .min(pool_deadline)
                        .run("pool acquire", returned)
                        .await;
                    if let Err(timeout) = waited {
                        return Err(self.expired_wait(deadline, pool_deadline, timeout));
                    }
                    if self.inner.closed.load(Ordering::Acquire) {
                        return Err(self.closed_error());
                    }
                }
            }
        };

        item.use_count += 1;
        item.last_used_at = now;
        Ok(PoolGuard {
            pool: Arc::clone(&self.inner),
            item: Some(item),
            invalid: false,
            _permit: permit,
        })
    }

    /// Return a handle explicitly. Equivalent to dropping the guard.
    pub fn release(&self, guard: PoolGuard<M>) {
        drop(guard);
    }

    /// Acquire, run `f` on the handle, release on every exit path.
    pub async fn run<T, F>(&self, deadline: Deadline, f: F) -> Result<T>
    where
        F: for<'r> FnOnce(&'r M::Resource) -> BoxFuture<'r, Result<T>>,
    {
        let guard = self.acquire(deadline).await?;
        let outcome = deadline.run("pool run", f(&*guard)).await?;
        outcome
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let idle = inner.idle.lock().len();
        let in_use = inner.cfg.max_size - inner.permits.available_permits().min(inner.cfg.max_size);
        PoolStats {
            name: inner.name.clone(),
            idle,
            in_use,
            total: inner.total.load(Ordering::Acquire),
            max_size: inner.cfg.max_size,
            waiters: inner.waiters.load(Ordering::Acquire),
            created: inner.created.load(Ordering::Relaxed),
            retired: inner.retired.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive use of one pooled handle.
pub struct PoolGuard<M: ResourceManager> {
    pool: Arc<PoolInner<M>>,
    item: Option<Pooled<M::Resource>>,
    invalid: bool,
    // Released after the handle is back in the idle list.
    _permit: OwnedSemaphorePermit,
}

impl<M: ResourceManager> PoolGuard<M> {
    pub fn id(&self) -> Uuid {
        self.item.as_ref().map(|i| i.id).unwrap_or_default()
    }

    pub fn use_count(&self) -> u64 {
        self.item.as_ref().map(|i| i.use_count).unwrap_or(0)
    }

    /// Mark the handle broken; it is destroyed instead of returned.
    pub fn invalidate(&mut self) {
        self.invalid = true;
    }
}

impl<M: ResourceManager> Deref for PoolGuard<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        match self.item.as_ref() {
            Some(item) => &item.resource,
            None => unreachable!("pool guard accessed after check-in"),
        }
    }
}

impl<M: ResourceManager> Drop for PoolGuard<M> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.check_in(item, self.invalid);
        }
    }
}
