//! # Resource Pool Module
//!
//! Reuses a bounded set of expensive client handles (HTTP or provider
//! clients) instead of building one per request.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResourceManager`] | Creates and health-checks one kind of handle |
//! | [`ResourcePool`] | Bounded checkout with queueing or fail-fast |
//! | [`PoolGuard`] | Exclusive use of one handle; returns it on drop |
//! | [`PooledUpstream`] | Direct (non-batched) upstream calls on pooled handles |
//!
//! ## Lifecycle
//!
//! - `initialize()` warms `min_size` handles
//! - `acquire()` reuses an idle handle or creates one up to `max_size`
//! - handles past `max_usage_count`, idle past `idle_timeout`, or failing
//!   validation are retired and replaced to keep `min_size`
//! - `shutdown()` stops maintenance and drops idle handles
//!
//! ```rust
//! use resilience_core::pool::{PoolConfig, ResourceManager, ResourcePool};
//! use resilience_core::utils::Deadline;
//! use async_trait::async_trait;
//!
//! struct Clients;
//!
//! #[async_trait]
//! impl ResourceManager for Clients {
//!     type Resource = String;
//!     async fn create(&self) -> resilience_core::Result<String> {
//!         Ok("client".to_string())
//!     }
//! }
//!
//! # async fn demo() -> resilience_core::Result<()> {
//! let pool = ResourcePool::new("ai", Clients, PoolConfig::new().with_max_size(4));
//! let client = pool.acquire(Deadline::none()).await?;
//! assert_eq!(client.as_str(), "client");
//! # Ok(())
//! # }
//! ```

mod core;
mod manager;
mod pooled;

pub use self::core::{PoolGuard, PoolStats, ResourcePool};
pub use manager::{PoolConfig, QueueMode, ResourceManager};
pub use pooled::{PooledHandler, PooledUpstream};
