//! One breaker per upstream name, created once and shared.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

pub struct BreakerRegistry {
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Use `cfg` instead of the defaults for `upstream`. Takes effect for
    /// breakers created after this call.
    pub fn with_override(mut self, upstream: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        self.overrides.insert(upstream.into(), cfg);
        self
    }

    /// Eagerly create breakers for the known upstreams.
    pub fn register<I, S>(&self, upstreams: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in upstreams {
            self.get(name.as_ref());
        }
    }

    /// Breaker for `upstream`, created with defaults (or its override) on first use.
    pub fn get(&self, upstream: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(upstream) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(upstream.to_string()).or_insert_with(|| {
            let cfg = self
                .overrides
                .get(upstream)
                .cloned()
                .unwrap_or_else(|| self.defaults.clone());
            Arc::new(CircuitBreaker::new(upstream, cfg))
        });
        Arc::clone(entry.value())
    }

    /// Administrative reset. Returns false for an unknown upstream.
    pub fn reset(&self, upstream: &str) -> bool {
        match self.breakers.get(upstream) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snaps: Vec<_> = self.breakers.iter().map(|e| e.value().snapshot()).collect();
        snaps.sort_by(|a, b| a.name.cmp(&b.name));
        snaps
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::{CircuitDecision, CircuitState};
    use std::time::Duration;

    #[test]
    fn test_same_name_same_breaker() {
        let registry = BreakerRegistry::default();
        let a = registry.get("ai");
        let b = registry.get("ai");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_upstreams_are_isolated() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::new().with_failure_threshold(1));
        registry.register(["ai", "images"]);
        if let CircuitDecision::Allowed(p) = registry.get("ai").try_acquire() {
            p.failure();
        }
        assert_eq!(registry.get("ai").state(), CircuitState::Open);
        assert_eq!(registry.get("images").state(), CircuitState::Closed);
        assert_eq!(registry.names(), vec!["ai".to_string(), "images".to_string()]);

        assert!(registry.reset("ai"));
        assert_eq!(registry.get("ai").state(), CircuitState::Closed);
        assert!(!registry.reset("missing"));
    }

    #[test]
    fn test_override_applies() {
        let registry = BreakerRegistry::default().with_override(
            "images",
            CircuitBreakerConfig::new().with_reset_timeout(Duration::from_secs(5)),
        );
        assert_eq!(registry.get("images").config().reset_timeout, Duration::from_secs(5));
        assert_eq!(registry.get("ai").config().reset_timeout, Duration::from_secs(30));
    }
}
