//! # resilience-core
//!
//! Admission control, failure isolation, pooling, batching and tiered
//! caching for calls to costly or fragile upstreams (AI generation, image
//! search and the like).
//!
//! ## Overview
//!
//! Every component makes its decisions under concurrent access and keeps
//! working, in a degraded but correct way, when the distributed store is
//! down:
//!
//! - **Rate limiting**: true sliding windows keyed by identity and endpoint
//!   class, with escalating blocks for repeat offenders. Fails open.
//! - **Circuit breaking**: one breaker per upstream, single half-open probe.
//! - **Pooling**: bounded reuse of expensive client handles with health checks.
//! - **Batching**: size/time windows with per-item results and retries.
//! - **Caching**: local LRU in front of the shared store, tag invalidation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilience_core::config::ResilienceConfig;
//! use resilience_core::facade::{EndpointRoute, Identity, Middleware, MiddlewareRequest, ResilienceContext};
//! use resilience_core::resilience::rate_limiter::EndpointClass;
//! use resilience_core::upstream::{upstream_fn, UpstreamError};
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> resilience_core::Result<()> {
//!     let config = ResilienceConfig::load("resilience.yaml")?;
//!     let ctx = Arc::new(ResilienceContext::from_config(config)?);
//!
//!     let ai = upstream_fn("ai", |payload: Value| async move {
//!         if payload.get("prompt").is_some() {
//!             Ok(json!({"text": "hola"}))
//!         } else {
//!             Err(UpstreamError::permanent("missing prompt"))
//!         }
//!     });
//!     let middleware = Middleware::new(ctx.clone())
//!         .with_route(EndpointRoute::direct("generate", EndpointClass::AiGeneration, Arc::new(ai)));
//!
//!     let resp = middleware
//!         .handle(MiddlewareRequest::new("generate", Identity::user("42"), json!({"prompt": "hello"})))
//!         .await;
//!     println!("{} {}", resp.status, resp.body);
//!
//!     ctx.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`store`] | Distributed and in-memory stores, sticky fallback |
//! | [`resilience`] | Rate limiter, backoff, circuit breaker, breaker registry |
//! | [`pool`] | Resource pool for client handles |
//! | [`batch`] | Batch windows and the batch processor |
//! | [`cache`] | Two-tier cache and key generation |
//! | [`facade`] | Middleware entry point, identity, routes, responses |
//! | [`config`] | YAML configuration with environment overrides |
//! | [`upstream`] | Provider contracts |
//! | [`telemetry`] | Tracing setup and signal snapshots |

pub mod batch;
pub mod cache;
pub mod config;
pub mod error_code;
pub mod facade;
pub mod pool;
pub mod resilience;
pub mod store;
pub mod telemetry;
pub mod upstream;
pub mod utils;

pub use config::ResilienceConfig;
pub use facade::{Identity, Middleware, MiddlewareRequest, MiddlewareResponse, ResilienceContext};
pub use upstream::{Upstream, UpstreamError};
pub use utils::Deadline;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
