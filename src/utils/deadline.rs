use crate::{Error, Result};
use std::future::Future;
use tokio::time::{Duration, Instant};

/// An optional point in time by which an operation must complete.
///
/// Exceeding it drops the in-flight future, which releases any pool handle
/// or breaker permit the future was holding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No deadline; operations may wait indefinitely (subject to their own timeouts).
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.at.map(|at| Instant::now() >= at).unwrap_or(false)
    }

    /// The earlier of two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        match (self.at, other.at) {
            (Some(a), Some(b)) => Deadline::at(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Deadline::at(a),
            (None, None) => Deadline::none(),
        }
    }

    /// Drive `fut` to completion or fail with [`Error::Timeout`] naming `operation`.
    pub async fn run<F: Future>(self, operation: &str, fut: F) -> Result<F::Output> {
        match self.at {
            None => Ok(fut.await),
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| Error::timeout(operation)),
        }
    }
}

impl From<Duration> for Deadline {
    fn from(timeout: Duration) -> Self {
        Deadline::after(timeout)
    }
}
