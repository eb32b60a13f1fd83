use crate::batch::BatchStats;
use crate::cache::CacheStats;
use crate::pool::PoolStats;
use crate::resilience::circuit_breaker::CircuitBreakerSnapshot;
use crate::store::StoreMode;
use serde::Serialize;

/// A lightweight snapshot of runtime "signals" for dashboards and health
/// endpoints.
///
/// Facts only; deciding what is unhealthy is left to the application.
#[derive(Debug, Clone, Serialize)]
pub struct SignalsSnapshot {
    pub store_mode: StoreMode,
    pub store_fallbacks: u64,
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,
    pub pools: Vec<PoolStats>,
    pub batches: Vec<BatchSignals>,
    pub cache: Option<CacheStats>,
}

impl SignalsSnapshot {
    /// Names of upstreams whose breaker is not closed.
    pub fn tripped_upstreams(&self) -> Vec<&str> {
        self.circuit_breakers
            .iter()
            .filter(|b| b.state != crate::resilience::CircuitState::Closed)
            .map(|b| b.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSignals {
    pub upstream: String,
    pub pending: usize,
    pub stats: BatchStats,
}
