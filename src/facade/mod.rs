//! # Middleware Façade
//!
//! The one entry point route handlers call. Everything behind it (cache,
//! rate limiter, breakers, pools, batch processors) is reached only through
//! [`Middleware::handle`].
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResilienceContext`] | Store, limiter, breaker registry and cache for one process |
//! | [`Middleware`] | Runs the request pipeline for registered routes |
//! | [`EndpointRoute`] | Endpoint class, dispatch mode and cache policy |
//! | [`Identity`] | Rate-limit identity resolved from the request |
//! | [`MiddlewareResponse`] | Status, JSON body and headers |
//!
//! ## Status mapping
//!
//! | Outcome | Status |
//! |---------|--------|
//! | rate limited | 429 + `Retry-After` |
//! | circuit open, pool exhausted | 503, retryable |
//! | upstream failure | 502 |
//! | deadline exceeded | 504 |
//! | internal | 500, no detail |
//!
//! ```rust
//! use resilience_core::facade::{EndpointRoute, Identity, Middleware, MiddlewareRequest, ResilienceContext};
//! use resilience_core::config::ResilienceConfig;
//! use resilience_core::resilience::rate_limiter::EndpointClass;
//! use resilience_core::upstream::upstream_fn;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! # async fn demo() -> resilience_core::Result<()> {
//! let ctx = Arc::new(ResilienceContext::from_config(ResilienceConfig::default())?);
//! let echo = upstream_fn("echo", |payload: Value| async move { Ok(payload) });
//! let middleware = Middleware::new(ctx)
//!     .with_route(EndpointRoute::direct("echo", EndpointClass::Default, Arc::new(echo)));
//!
//! let resp = middleware
//!     .handle(MiddlewareRequest::new("echo", Identity::user("42"), json!({"hi": 1})))
//!     .await;
//! assert_eq!(resp.status, 200);
//! # Ok(())
//! # }
//! ```

mod context;
mod identity;
mod middleware;
mod response;
mod route;

pub use context::{ManagedPool, ResilienceContext};
pub use identity::{ClientInfo, Identity, IdentityKind};
pub use middleware::{Middleware, MiddlewareRequest};
pub use response::MiddlewareResponse;
pub use route::{CachePolicy, Dispatch, EndpointRoute};
