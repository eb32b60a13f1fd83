//! Batch window: collects items until it is full or old enough to flush.

use super::retry::RetryPolicy;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub max_wait_time: Duration,
    /// Batches allowed in flight at once.
    pub max_in_flight: usize,
    /// Bound on one upstream attempt.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            max_wait_time: Duration::from_millis(50),
            max_in_flight: 4,
            call_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_batch_size(mut self, s: usize) -> Self {
        self.max_batch_size = s;
        self
    }

    pub fn with_max_wait_time(mut self, t: Duration) -> Self {
        self.max_wait_time = t;
        self
    }

    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n;
        self
    }

    pub fn with_call_timeout(mut self, t: Duration) -> Self {
        self.call_timeout = t;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BatchItem<T> {
    pub data: T,
    pub added_at: Instant,
    pub request_id: Uuid,
}

impl<T> BatchItem<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            added_at: Instant::now(),
            request_id: Uuid::new_v4(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAddResult {
    /// Item queued. `opened` is set when it started a new window, whose
    /// timer the caller must arm for `generation`.
    Added {
        count: usize,
        opened: bool,
        generation: u64,
    },
    ShouldFlush { count: usize },
}

impl BatchAddResult {
    pub fn should_flush(&self) -> bool {
        matches!(self, BatchAddResult::ShouldFlush { .. })
    }

    pub fn count(&self) -> usize {
        match self {
            BatchAddResult::Added { count, .. } | BatchAddResult::ShouldFlush { count } => *count,
        }
    }
}

/// Pending items plus the bookkeeping for size and age flushes.
///
/// Each drained window bumps `generation`, so a timer armed for an earlier
/// window can tell it has nothing left to do.
#[derive(Debug)]
pub struct BatchWindow<P> {
    items: Vec<P>,
    opened_at: Option<Instant>,
    generation: u64,
    max_size: usize,
}

impl<P> BatchWindow<P> {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Vec::new(),
            opened_at: None,
            generation: 0,
            max_size: max_size.max(1),
        }
    }

    pub fn push(&mut self, item: P) -> BatchAddResult {
        let opened = self.items.is_empty();
        if opened {
            self.opened_at = Some(Instant::now());
        }
        self.items.push(item);
        let count = self.items.len();
        if count >= self.max_size {
            BatchAddResult::ShouldFlush { count }
        } else {
            BatchAddResult::Added {
                count,
                opened,
                generation: self.generation,
            }
        }
    }

    pub fn is_due(&self, now: Instant, max_wait: Duration) -> bool {
        if self.items.len() >= self.max_size {
            return true;
        }
        self.opened_at
            .is_some_and(|opened| now.duration_since(opened) >= max_wait)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Take every pending item, in arrival order, and start a new window.
    pub fn drain(&mut self) -> Vec<P> {
        self.opened_at = None;
        self.generation = self.generation.wrapping_add(1);
        std::mem::take(&mut self.items)
    }

    /// Drain only if the window is still the one `generation` refers to.
    pub fn drain_generation(&mut self, generation: u64) -> Option<Vec<P>> {
        (self.generation == generation && !self.items.is_empty()).then(|| self.drain())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
