use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Knows how to build and check one kind of expensive handle.
#[async_trait]
pub trait ResourceManager: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;

    async fn create(&self) -> Result<Self::Resource>;

    /// Health check run on idle resources by the maintenance task.
    async fn validate(&self, _resource: &Self::Resource) -> bool {
        true
    }
}

/// What `acquire` does when every handle is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Wait in a bounded queue; callers beyond `max_waiters` are rejected.
    Queue { max_waiters: usize },
    /// Reject immediately.
    FailFast,
}

impl Default for QueueMode {
    fn default() -> Self {
        QueueMode::Queue { max_waiters: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_usage_count: u64,
    pub health_check_interval: Duration,
    pub queue: QueueMode,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            max_usage_count: 1000,
            health_check_interval: Duration::from_secs(30),
            queue: QueueMode::default(),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_size(mut self, n: usize) -> Self {
        self.min_size = n;
        self
    }

    pub fn with_max_size(mut self, n: usize) -> Self {
        self.max_size = n;
        self
    }

    pub fn with_acquire_timeout(mut self, t: Duration) -> Self {
        self.acquire_timeout = t;
        self
    }

    pub fn with_idle_timeout(mut self, t: Duration) -> Self {
        self.idle_timeout = t;
        self
    }

    pub fn with_max_usage_count(mut self, n: u64) -> Self {
        self.max_usage_count = n;
        self
    }

    pub fn with_health_check_interval(mut self, t: Duration) -> Self {
        self.health_check_interval = t;
        self
    }

    pub fn with_queue(mut self, queue: QueueMode) -> Self {
        self.queue = queue;
        self
    }
}
