use rand::Rng;
use std::time::Duration;

/// Exponential backoff with random jitter between batch attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Up to this fraction of the delay is added at random (0.0 disables jitter).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_initial_delay(mut self, d: Duration) -> Self {
        self.initial_delay = d;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    pub fn with_jitter_factor(mut self, f: f64) -> Self {
        self.jitter_factor = f.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(retry.saturating_sub(1));
        let capped = self.initial_delay.saturating_mul(multiplier).min(self.max_delay);
        if self.jitter_factor <= 0.0 {
            return capped;
        }
        let jitter = rand::rng().random_range(0.0..self.jitter_factor);
        capped + capped.mul_f64(jitter)
    }
}
