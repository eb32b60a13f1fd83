//! File and environment configuration for the whole resilience core.
//!
//! Durations are integers with a unit suffix in the field name (`*_ms`,
//! `*_secs`). Every section is optional; omitted fields take the same
//! defaults as the component `*Config` builders.
//!
//! ```yaml
//! store:
//!   redis_url: redis://127.0.0.1/
//! rate_limit:
//!   allowlist: ["user:admin"]
//!   policies:
//!     ai_generation: { max_requests: 10, window_ms: 60000 }
//! circuit_breaker:
//!   failure_threshold: 3
//!   upstreams: [ai, image-search]
//! ```
//!
//! Environment overrides:
//! - `RESILIENCE_REDIS_URL`
//! - `RESILIENCE_BREAKER_FAILURE_THRESHOLD`
//! - `RESILIENCE_BREAKER_RESET_TIMEOUT_MS`
//! - `RESILIENCE_POOL_MAX_SIZE`
//! - `RESILIENCE_CACHE_TTL_SECS`

use crate::batch::{BatchConfig, RetryPolicy};
use crate::cache::{CacheConfig, CacheKeyGenerator};
use crate::pool::{PoolConfig, QueueMode};
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::rate_limiter::{EndpointClass, RateLimitPolicy, RateLimiterConfig};
use crate::resilience::registry::BreakerRegistry;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub store: StoreSettings,
    pub rate_limit: RateLimitSettings,
    pub circuit_breaker: CircuitBreakerSection,
    pub pool: PoolSettings,
    pub batch: BatchSettings,
    pub cache: CacheSettings,
    pub request: RequestSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Memory-only when absent.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub operation_timeout_ms: u64,
    /// How long to stay on the memory store after a distributed failure.
    pub fallback_cooldown_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "rc:".to_string(),
            operation_timeout_ms: 250,
            fallback_cooldown_ms: 30_000,
            sweep_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub max_requests: u64,
    pub window_ms: u64,
    pub violation_threshold: u32,
    pub base_block_ms: u64,
    pub max_block_ms: u64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self::from_policy(&EndpointClass::Default.default_policy())
    }
}

impl PolicySettings {
    fn from_policy(policy: &RateLimitPolicy) -> Self {
        Self {
            max_requests: policy.max_requests,
            window_ms: policy.window.as_millis() as u64,
            violation_threshold: policy.backoff.violation_threshold,
            base_block_ms: policy.backoff.base_block.as_millis() as u64,
            max_block_ms: policy.backoff.max_block.as_millis() as u64,
        }
    }

    pub fn to_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.max_requests, Duration::from_millis(self.window_ms)).with_backoff(
            BackoffPolicy::new()
                .with_violation_threshold(self.violation_threshold)
                .with_base_block(Duration::from_millis(self.base_block_ms))
                .with_max_block(Duration::from_millis(self.max_block_ms)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub allowlist: Vec<String>,
    /// Classes missing here keep their built-in limits.
    pub policies: BTreeMap<String, PolicySettings>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            allowlist: Vec::new(),
            policies: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub rolling_window_ms: u64,
    pub error_threshold_percentage: u8,
    pub minimum_calls: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let d = CircuitBreakerConfig::default();
        Self {
            failure_threshold: d.failure_threshold,
            reset_timeout_ms: d.reset_timeout.as_millis() as u64,
            rolling_window_ms: d.rolling_window.as_millis() as u64,
            error_threshold_percentage: d.error_threshold_percentage,
            minimum_calls: d.minimum_calls,
        }
    }
}

impl BreakerSettings {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(self.failure_threshold)
            .with_reset_timeout(Duration::from_millis(self.reset_timeout_ms))
            .with_rolling_window(Duration::from_millis(self.rolling_window_ms))
            .with_error_threshold_percentage(self.error_threshold_percentage)
            .with_minimum_calls(self.minimum_calls)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    #[serde(flatten)]
    pub defaults: BreakerSettings,
    /// Upstreams whose breakers are created at startup.
    pub upstreams: Vec<String>,
    pub overrides: BTreeMap<String, BreakerSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub min_size: usize,
    pub max_size: usize,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_usage_count: u64,
    pub health_check_interval_ms: u64,
    pub fail_fast: bool,
    pub max_waiters: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        let d = PoolConfig::default();
        let max_waiters = match d.queue {
            QueueMode::Queue { max_waiters } => max_waiters,
            QueueMode::FailFast => 0,
        };
        Self {
            min_size: d.min_size,
            max_size: d.max_size,
            acquire_timeout_ms: d.acquire_timeout.as_millis() as u64,
            idle_timeout_ms: d.idle_timeout.as_millis() as u64,
            max_usage_count: d.max_usage_count,
            health_check_interval_ms: d.health_check_interval.as_millis() as u64,
            fail_fast: false,
            max_waiters,
        }
    }
}

impl PoolSettings {
    pub fn to_config(&self) -> PoolConfig {
        let queue = if self.fail_fast {
            QueueMode::FailFast
        } else {
            QueueMode::Queue {
                max_waiters: self.max_waiters,
            }
        };
        PoolConfig::new()
            .with_min_size(self.min_size)
            .with_max_size(self.max_size)
            .with_acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
            .with_idle_timeout(Duration::from_millis(self.idle_timeout_ms))
            .with_max_usage_count(self.max_usage_count)
            .with_health_check_interval(Duration::from_millis(self.health_check_interval_ms))
            .with_queue(queue)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub max_batch_size: usize,
    pub max_wait_ms: u64,
    pub max_in_flight: usize,
    pub call_timeout_ms: u64,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        let d = BatchConfig::default();
        Self {
            max_batch_size: d.max_batch_size,
            max_wait_ms: d.max_wait_time.as_millis() as u64,
            max_in_flight: d.max_in_flight,
            call_timeout_ms: d.call_timeout.as_millis() as u64,
            max_retries: d.retry.max_retries,
            initial_retry_delay_ms: d.retry.initial_delay.as_millis() as u64,
            max_retry_delay_ms: d.retry.max_delay.as_millis() as u64,
            jitter_factor: d.retry.jitter_factor,
        }
    }
}

impl BatchSettings {
    pub fn to_config(&self) -> BatchConfig {
        BatchConfig::new()
            .with_max_batch_size(self.max_batch_size)
            .with_max_wait_time(Duration::from_millis(self.max_wait_ms))
            .with_max_in_flight(self.max_in_flight)
            .with_call_timeout(Duration::from_millis(self.call_timeout_ms))
            .with_retry(
                RetryPolicy::new()
                    .with_max_retries(self.max_retries)
                    .with_initial_delay(Duration::from_millis(self.initial_retry_delay_ms))
                    .with_max_delay(Duration::from_millis(self.max_retry_delay_ms))
                    .with_jitter_factor(self.jitter_factor),
            )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub local_ttl_secs: u64,
    pub local_capacity: usize,
    pub max_entry_size: usize,
    pub key_prefix: String,
    /// Payload fields ignored when computing cache keys.
    pub volatile_fields: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let d = CacheConfig::default();
        Self {
            enabled: d.enabled,
            ttl_secs: d.default_ttl.as_secs(),
            local_ttl_secs: d.local_ttl.as_secs(),
            local_capacity: d.local_capacity,
            max_entry_size: d.max_entry_size,
            key_prefix: d.key_prefix,
            volatile_fields: vec!["timestamp".into(), "request_id".into(), "nonce".into()],
        }
    }
}

impl CacheSettings {
    pub fn to_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_enabled(self.enabled)
            .with_ttl(Duration::from_secs(self.ttl_secs))
            .with_local_ttl(Duration::from_secs(self.local_ttl_secs))
            .with_local_capacity(self.local_capacity)
            .with_max_entry_size(self.max_entry_size)
            .with_key_prefix(self.key_prefix.clone())
    }

    pub fn key_generator(&self) -> CacheKeyGenerator {
        CacheKeyGenerator::new().with_volatile_fields(self.volatile_fields.iter().cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    /// Deadline applied to requests that arrive without one.
    pub default_timeout_ms: u64,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("config_validator"),
    )
}

impl ResilienceConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Read the file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let cfg = Self::from_yaml_file(path)?.with_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`; values that do not parse are ignored.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("RESILIENCE_REDIS_URL").filter(|s| !s.is_empty()) {
            self.store.redis_url = Some(url);
        }
        if let Some(n) = lookup("RESILIENCE_BREAKER_FAILURE_THRESHOLD").and_then(|s| s.parse::<u32>().ok()) {
            self.circuit_breaker.defaults.failure_threshold = n;
        }
        if let Some(ms) = lookup("RESILIENCE_BREAKER_RESET_TIMEOUT_MS").and_then(|s| s.parse::<u64>().ok()) {
            self.circuit_breaker.defaults.reset_timeout_ms = ms;
        }
        if let Some(n) = lookup("RESILIENCE_POOL_MAX_SIZE").and_then(|s| s.parse::<usize>().ok()) {
            self.pool.max_size = n;
        }
        if let Some(secs) = lookup("RESILIENCE_CACHE_TTL_SECS").and_then(|s| s.parse::<u64>().ok()) {
            self.cache.ttl_secs = secs;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, policy) in &self.rate_limit.policies {
            let field = format!("rate_limit.policies.{name}");
            if EndpointClass::parse(name).as_str() != name.as_str() {
                return Err(invalid(&field, format!("unknown endpoint class '{name}'")));
            }
            if policy.max_requests == 0 {
                return Err(invalid(&format!("{field}.max_requests"), "must be positive"));
            }
            if policy.window_ms == 0 {
                return Err(invalid(&format!("{field}.window_ms"), "must be positive"));
            }
            if policy.base_block_ms > policy.max_block_ms {
                return Err(invalid(
                    &format!("{field}.base_block_ms"),
                    "must not exceed max_block_ms",
                ));
            }
        }

        let breakers = std::iter::once(("circuit_breaker".to_string(), &self.circuit_breaker.defaults))
            .chain(
                self.circuit_breaker
                    .overrides
                    .iter()
                    .map(|(name, b)| (format!("circuit_breaker.overrides.{name}"), b)),
            );
        for (field, b) in breakers {
            if b.failure_threshold == 0 {
                return Err(invalid(&format!("{field}.failure_threshold"), "must be positive"));
            }
            if b.reset_timeout_ms == 0 {
                return Err(invalid(&format!("{field}.reset_timeout_ms"), "must be positive"));
            }
            if b.error_threshold_percentage == 0 || b.error_threshold_percentage > 100 {
                return Err(invalid(
                    &format!("{field}.error_threshold_percentage"),
                    "must be within 1..=100",
                ));
            }
        }

        if self.pool.max_size == 0 {
            return Err(invalid("pool.max_size", "must be positive"));
        }
        if self.pool.min_size > self.pool.max_size {
            return Err(invalid(
                "pool.min_size",
                format!(
                    "min_size {} exceeds max_size {}",
                    self.pool.min_size, self.pool.max_size
                ),
            ));
        }
        if self.batch.max_batch_size == 0 {
            return Err(invalid("batch.max_batch_size", "must be positive"));
        }
        if self.batch.max_in_flight == 0 {
            return Err(invalid("batch.max_in_flight", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.batch.jitter_factor) {
            return Err(invalid("batch.jitter_factor", "must be within 0.0..=1.0"));
        }
        if self.cache.enabled && self.cache.ttl_secs == 0 {
            return Err(invalid("cache.ttl_secs", "must be positive when caching is enabled"));
        }
        Ok(())
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        let mut cfg = RateLimiterConfig::new().with_enabled(self.rate_limit.enabled);
        for (name, policy) in &self.rate_limit.policies {
            cfg = cfg.with_policy(EndpointClass::parse(name), policy.to_policy());
        }
        for identity in &self.rate_limit.allowlist {
            cfg = cfg.with_allowlisted(identity.clone());
        }
        cfg
    }

    pub fn breaker_registry(&self) -> BreakerRegistry {
        let mut registry = BreakerRegistry::new(self.circuit_breaker.defaults.to_config());
        for (name, settings) in &self.circuit_breaker.overrides {
            registry = registry.with_override(name.clone(), settings.to_config());
        }
        registry.register(&self.circuit_breaker.upstreams);
        registry
    }

    pub fn pool_config(&self) -> PoolConfig {
        self.pool.to_config()
    }

    pub fn batch_config(&self) -> BatchConfig {
        self.batch.to_config()
    }

    pub fn cache_config(&self) -> CacheConfig {
        self.cache.to_config()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.request.default_timeout_ms)
    }
}
