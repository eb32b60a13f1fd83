//! Shared helpers: deadlines and wall-clock time.

mod deadline;

pub use deadline::Deadline;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// Rate-limit windows are keyed on wall-clock time so that several
/// instances sharing one distributed store agree on window boundaries.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
