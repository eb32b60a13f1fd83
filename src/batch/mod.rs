//! # Request Batching Module
//!
//! Groups requests for batch-capable upstreams into one call while still
//! answering every caller with its own result.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchConfig`] | Batch size, wait time, in-flight cap, call timeout |
//! | [`BatchWindow`] | Pending items for the current window |
//! | [`BatchProcessor`] | Flushes windows through breaker, pool and upstream |
//! | [`RetryPolicy`] | Jittered exponential backoff for failed items |
//! | [`BatchSubmitter`] | JSON-level submission used by the middleware |
//!
//! ## Flush Rules
//!
//! - a window flushes as soon as it holds `max_batch_size` items
//! - otherwise it flushes `max_wait_time` after its first item arrived
//! - at most `max_in_flight` batches run upstream at once
//! - only the failed, retryable items of a batch are retried
//!
//! ```rust
//! use resilience_core::batch::{BatchConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! let config = BatchConfig::new()
//!     .with_max_batch_size(16)
//!     .with_max_wait_time(Duration::from_millis(25))
//!     .with_retry(RetryPolicy::new().with_max_retries(1));
//! assert_eq!(config.max_batch_size, 16);
//! ```

mod collector;
mod executor;
mod processor;
mod retry;

pub use collector::{BatchAddResult, BatchConfig, BatchItem, BatchWindow};
pub use executor::{attribute, CallFailure, ItemOutcomes};
pub use processor::{BatchProcessor, BatchStats, BatchSubmitter};
pub use retry::RetryPolicy;
