//! Escalating blocks for callers that keep hitting their limit.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Violations tolerated before blocking starts.
    pub violation_threshold: u32,
    pub base_block: Duration,
    pub max_block: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            violation_threshold: 3,
            base_block: Duration::from_secs(1),
            max_block: Duration::from_secs(3600),
        }
    }
}

impl BackoffPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_violation_threshold(mut self, threshold: u32) -> Self {
        self.violation_threshold = threshold;
        self
    }

    pub fn with_base_block(mut self, base: Duration) -> Self {
        self.base_block = base;
        self
    }

    pub fn with_max_block(mut self, max: Duration) -> Self {
        self.max_block = max;
        self
    }

    /// Block length for the given violation count: `base * 2^violations`,
    /// capped at `max_block`. Zero while at or below the threshold.
    pub fn block_for(&self, violations: u32) -> Duration {
        if violations <= self.violation_threshold {
            return Duration::ZERO;
        }
        let base_ms = self.base_block.as_millis() as u64;
        let max_ms = self.max_block.as_millis() as u64;
        let factor = 1u64.checked_shl(violations).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }
}

/// Per-key violation record, persisted next to the key's window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffState {
    pub consecutive_violations: u32,
    pub blocked_until_ms: Option<u64>,
    pub last_violation_ms: Option<u64>,
}

impl BackoffState {
    pub fn is_blocked(&self, now_ms: u64) -> bool {
        self.blocked_until_ms.is_some_and(|until| until > now_ms)
    }

    pub fn block_remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.blocked_until_ms
            .filter(|&until| until > now_ms)
            .map(|until| until - now_ms)
    }

    /// A key is forgiven once a full window has passed since its last
    /// violation and it is no longer blocked.
    pub fn is_quiet(&self, now_ms: u64, window_ms: u64) -> bool {
        !self.is_blocked(now_ms)
            && self
                .last_violation_ms
                .is_some_and(|last| now_ms.saturating_sub(last) >= window_ms)
    }

    /// Count one violation and extend the block if the threshold is passed.
    /// `blocked_until_ms` never moves backwards.
    pub fn register_violation(&mut self, now_ms: u64, policy: &BackoffPolicy) {
        self.consecutive_violations = self.consecutive_violations.saturating_add(1);
        self.last_violation_ms = Some(now_ms);
        let block = policy.block_for(self.consecutive_violations);
        if block.is_zero() {
            return;
        }
        let candidate = now_ms.saturating_add(block.as_millis() as u64);
        self.blocked_until_ms = Some(self.blocked_until_ms.map_or(candidate, |prev| prev.max(candidate)));
    }
}
