//! # Resilience Primitives Module
//!
//! Admission control and failure isolation for outbound calls.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Sliding-window limiter keyed by identity and endpoint class |
//! | [`backoff`] | Escalating blocks for repeat offenders |
//! | [`circuit_breaker`] | Closed / open / half-open breaker with a single probe |
//! | [`registry`] | One breaker per upstream name |
//!
//! ## Circuit Breaker
//!
//! - **Closed**: Normal operation, failures counted over a rolling window
//! - **Open**: Threshold or error rate exceeded, calls fail fast
//! - **Half-Open**: One probe call decides whether to close again
//!
//! ```rust
//! use resilience_core::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitDecision};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::new()
//!     .with_failure_threshold(5)
//!     .with_reset_timeout(Duration::from_secs(30));
//! let breaker = CircuitBreaker::new("ai", config);
//!
//! if let CircuitDecision::Allowed(permit) = breaker.try_acquire() {
//!     // Make the upstream call...
//!     permit.success();
//! };
//! ```
//!
//! ## Rate Limiter
//!
//! ```rust
//! use resilience_core::resilience::rate_limiter::{EndpointClass, RateLimitKey, RateLimiter, RateLimiterConfig};
//! use resilience_core::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), RateLimiterConfig::new());
//! let decision = limiter.check(&RateLimitKey::new("user:42", EndpointClass::Search)).await;
//! if decision.allowed {
//!     // Proceed with request...
//! }
//! # }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod registry;

pub use backoff::{BackoffPolicy, BackoffState};
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitDecision,
    CircuitState,
};
pub use rate_limiter::{
    EndpointClass, RateLimitDecision, RateLimitKey, RateLimitPolicy, RateLimiter,
    RateLimiterConfig,
};
pub use registry::BreakerRegistry;
