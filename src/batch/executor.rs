//! Per-item attribution of one batched upstream call.

use crate::upstream::UpstreamError;
use crate::Error;

/// How one attempt went, item by item.
#[derive(Debug)]
pub struct ItemOutcomes<P, O> {
    pub delivered: Vec<(P, O)>,
    /// Failed but worth another attempt.
    pub retry: Vec<(P, Error)>,
    pub failed: Vec<(P, Error)>,
    /// The call failed as a whole, so no item was processed.
    pub whole_call_failed: bool,
}

impl<P, O> ItemOutcomes<P, O> {
    /// A batch is unhealthy when nothing in it went through.
    pub fn is_total_failure(&self) -> bool {
        self.whole_call_failed || self.delivered.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn failure_count(&self) -> usize {
        self.retry.len() + self.failed.len()
    }
}

/// Why an attempt produced no per-item results.
#[derive(Debug)]
pub enum CallFailure {
    Upstream(UpstreamError),
    TimedOut,
}

fn item_error(upstream: &str, attempt: u32, failure: &CallFailure) -> Error {
    match failure {
        CallFailure::Upstream(e) => e.clone().into_error(upstream, attempt),
        CallFailure::TimedOut => Error::timeout(format!("batch call to '{upstream}'")),
    }
}

/// Pair every pending item with its own result.
///
/// A whole-call failure is fanned out to every item. A result list whose
/// length does not match the batch cannot be attributed and is treated as a
/// permanent whole-call failure.
pub fn attribute<P, O>(
    upstream: &str,
    attempt: u32,
    pending: Vec<P>,
    results: std::result::Result<Vec<std::result::Result<O, UpstreamError>>, CallFailure>,
) -> ItemOutcomes<P, O> {
    let mut outcomes = ItemOutcomes {
        delivered: Vec::new(),
        retry: Vec::new(),
        failed: Vec::new(),
        whole_call_failed: false,
    };

    let results = match results {
        Ok(results) if results.len() == pending.len() => results,
        Ok(results) => {
            let failure = CallFailure::Upstream(UpstreamError::permanent(format!(
                "upstream returned {} results for {} items",
                results.len(),
                pending.len()
            )));
            outcomes.whole_call_failed = true;
            fan_out(upstream, attempt, &failure, pending, &mut outcomes);
            return outcomes;
        }
        Err(failure) => {
            outcomes.whole_call_failed = true;
            fan_out(upstream, attempt, &failure, pending, &mut outcomes);
            return outcomes;
        }
    };

    for (item, result) in pending.into_iter().zip(results) {
        match result {
            Ok(output) => outcomes.delivered.push((item, output)),
            Err(e) => {
                let err = e.into_error(upstream, attempt);
                if err.is_retryable() {
                    outcomes.retry.push((item, err));
                } else {
                    outcomes.failed.push((item, err));
                }
            }
        }
    }
    outcomes
}

fn fan_out<P, O>(
    upstream: &str,
    attempt: u32,
    failure: &CallFailure,
    pending: Vec<P>,
    outcomes: &mut ItemOutcomes<P, O>,
) {
    let retryable = match failure {
        CallFailure::Upstream(e) => e.retryable,
        CallFailure::TimedOut => true,
    };
    for item in pending {
        let err = item_error(upstream, attempt, failure);
        if retryable {
            outcomes.retry.push((item, err));
        } else {
            outcomes.failed.push((item, err));
        }
    }
}
