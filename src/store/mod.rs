//! Key/value and counter storage shared by the rate limiter and the cache.
//!
//! # Store Module
//!
//! Every component that needs shared state talks to a [`Store`]. Two
//! implementations exist behind the one trait:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RedisStore`] | Distributed, survives restarts, visible to every instance |
//! | [`MemoryStore`] | Process-local, fast, lost on restart, swept periodically |
//! | [`FallbackStore`] | Tries the distributed store first, degrades to memory |
//!
//! ## Degraded mode
//!
//! When the distributed backend fails, [`FallbackStore`] logs a warning and
//! serves from memory for a cooldown period before trying the backend again.
//! While degraded each instance enforces its own limits independently.
//!
//! ```rust
//! use resilience_core::store::{FallbackStore, MemoryStore, Store};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> resilience_core::Result<()> {
//! let store = FallbackStore::memory_only(MemoryStore::new());
//! store.set("greeting", b"hi", Duration::from_secs(30), &[]).await?;
//! assert_eq!(store.get("greeting").await?, Some(b"hi".to_vec()));
//! # Ok(())
//! # }
//! ```

mod fallback;
mod memory;
mod redis_backend;

pub use fallback::{FallbackStore, StoreMode};
pub use memory::MemoryStore;
pub use redis_backend::RedisStore;

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Result of one sliding-window admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Entries inside the window after this check, including one just recorded.
    pub count: u64,
    /// Whether the current request was recorded (it fit under the limit).
    pub recorded: bool,
    /// Oldest timestamp (ms since epoch) still inside the window.
    pub oldest_ms: Option<u64>,
}

/// Storage capability set required by the resilience core.
///
/// Implementations must make [`Store::check_window`] and
/// [`Store::increment_and_count`] atomic per key.
#[async_trait]
pub trait Store: Send + Sync {
    /// Prune timestamps older than `now_ms - window`, then record `now_ms`
    /// only if fewer than `limit` entries remain.
    async fn check_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
    ) -> Result<WindowCount>;

    /// Record the current instant unconditionally and return how many
    /// entries fall inside the trailing `window`.
    async fn increment_and_count(&self, key: &str, window: Duration) -> Result<u64>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`, indexed under every tag in `tags`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration, tags: &[String]) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every value indexed under `tag`; returns how many were removed.
    async fn delete_by_tag(&self, tag: &str) -> Result<u64>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}
