use crate::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub failures_in_window: u32,
    pub calls_in_window: u32,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
    pub times_opened: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    /// Window over which failures and the error rate are counted.
    pub rolling_window: Duration,
    pub error_threshold_percentage: u8,
    /// Calls needed in the window before the error rate is considered.
    pub minimum_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            rolling_window: Duration::from_secs(60),
            error_threshold_percentage: 50,
            minimum_calls: 10,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window = window;
        self
    }

    pub fn with_error_threshold_percentage(mut self, pct: u8) -> Self {
        self.error_threshold_percentage = pct.min(100);
        self
    }

    pub fn with_minimum_calls(mut self, calls: u32) -> Self {
        self.minimum_calls = calls;
        self
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    /// (finished_at, failed) for calls inside the rolling window.
    outcomes: VecDeque<(Instant, bool)>,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    times_opened: u64,
}

impl State {
    fn prune(&mut self, now: Instant, window: Duration) {
        while matches!(self.outcomes.front(), Some((at, _)) if now.duration_since(*at) > window) {
            self.outcomes.pop_front();
        }
    }

    fn failures(&self) -> u32 {
        self.outcomes.iter().filter(|(_, failed)| *failed).count() as u32
    }
}

/// Whether a call may proceed.
#[must_use]
pub enum CircuitDecision<'a> {
    Allowed(CallPermit<'a>),
    Rejected { retry_after: Duration },
}

/// Admission for one call. Report the outcome with [`CallPermit::success`]
/// or [`CallPermit::failure`]; dropping it unreported records nothing and
/// frees the half-open probe slot.
#[must_use]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_result(self.probe, false);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_result(self.probe, true);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}

/// Per-upstream circuit breaker.
///
/// - Closed: calls pass; failures are counted over `rolling_window`
/// - Open: calls are rejected without running until `reset_timeout` passes
/// - Half-open: exactly one probe call is admitted; its outcome decides
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                consecutive_failures: 0,
                last_failure: None,
                opened_at: None,
                probe_in_flight: false,
                times_opened: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    /// Observed state. An open circuit whose timeout has passed reports
    /// half-open even before the next call performs the transition.
    pub fn state(&self) -> CircuitState {
        let st = self.state.lock();
        match (st.state, st.opened_at) {
            (CircuitState::Open, Some(at)) if at.elapsed() >= self.cfg.reset_timeout => {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    pub fn try_acquire(&self) -> CircuitDecision<'_> {
        let now = Instant::now();
        let mut st = self.state.lock();
        match st.state {
            CircuitState::Closed => CircuitDecision::Allowed(self.permit(false)),
            CircuitState::Open => {
                let opened_at = st.opened_at.unwrap_or(now);
                let elapsed = now.duration_since(opened_at);
                if elapsed < self.cfg.reset_timeout {
                    return CircuitDecision::Rejected {
                        retry_after: self.cfg.reset_timeout - elapsed,
                    };
                }
                st.state = CircuitState::HalfOpen;
                st.probe_in_flight = true;
                info!(upstream = %self.name, state = %CircuitState::HalfOpen, "circuit half-open, admitting probe");
                CircuitDecision::Allowed(self.permit(true))
            }
            CircuitState::HalfOpen => {
                if st.probe_in_flight {
                    CircuitDecision::Rejected {
                        retry_after: self.cfg.reset_timeout,
                    }
                } else {
                    st.probe_in_flight = true;
                    CircuitDecision::Allowed(self.permit(true))
                }
            }
        }
    }

    fn permit(&self, probe: bool) -> CallPermit<'_> {
        CallPermit {
            breaker: self,
            probe,
            settled: false,
        }
    }

    fn on_result(&self, probe: bool, failed: bool) {
        let now = Instant::now();
        let mut st = self.state.lock();
        match (st.state, probe) {
            (CircuitState::HalfOpen, true) => {
                st.probe_in_flight = false;
                if failed {
                    self.open(&mut st, now);
                } else {
                    st.state = CircuitState::Closed;
                    st.outcomes.clear();
                    st.consecutive_failures = 0;
                    st.opened_at = None;
                    info!(upstream = %self.name, state = %CircuitState::Closed, "circuit closed");
                }
            }
            (CircuitState::Closed, _) => {
                st.prune(now, self.cfg.rolling_window);
                st.outcomes.push_back((now, failed));
                if failed {
                    st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                    st.last_failure = Some(now);
                    if self.should_trip(&st) {
                        self.open(&mut st, now);
                    }
                } else {
                    st.consecutive_failures = 0;
                }
            }
            // Late results from calls admitted before the circuit opened.
            _ => {}
        }
    }

    fn should_trip(&self, st: &State) -> bool {
        let failures = st.failures();
        if failures >= self.cfg.failure_threshold {
            return true;
        }
        let calls = st.outcomes.len() as u32;
        calls >= self.cfg.minimum_calls.max(1)
            && failures * 100 >= u32::from(self.cfg.error_threshold_percentage) * calls
    }

    fn open(&self, st: &mut State, now: Instant) {
        st.state = CircuitState::Open;
        st.opened_at = Some(now);
        st.probe_in_flight = false;
        st.times_opened += 1;
        info!(
            upstream = %self.name,
            state = %CircuitState::Open,
            failures = st.failures(),
            reset_timeout_ms = self.cfg.reset_timeout.as_millis() as u64,
            "circuit opened"
        );
    }

    fn release_probe(&self) {
        let mut st = self.state.lock();
        if st.state == CircuitState::HalfOpen {
            st.probe_in_flight = false;
        }
    }

    /// Run `f` under the breaker. Only upstream faults (failures and
    /// timeouts) count against the circuit; other errors are passed through
    /// without being recorded.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = match self.try_acquire() {
            CircuitDecision::Allowed(permit) => permit,
            CircuitDecision::Rejected { retry_after } => {
                return Err(Error::CircuitOpen {
                    upstream: self.name.clone(),
                    retry_after_ms: retry_after.as_millis() as u64,
                })
            }
        };
        match f().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) if e.is_upstream_fault() => {
                permit.failure();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Force the circuit closed and forget all history.
    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.state = CircuitState::Closed;
        st.outcomes.clear();
        st.consecutive_failures = 0;
        st.opened_at = None;
        st.probe_in_flight = false;
        info!(upstream = %self.name, "circuit reset");
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let mut st = self.state.lock();
        st.prune(now, self.cfg.rolling_window);
        let open_remaining_ms = match (st.state, st.opened_at) {
            (CircuitState::Open, Some(at)) => self
                .cfg
                .reset_timeout
                .checked_sub(now.duration_since(at))
                .map(|d| d.as_millis() as u64),
            _ => None,
        };
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: st.state,
            failure_threshold: self.cfg.failure_threshold,
            reset_timeout_ms: self.cfg.reset_timeout.as_millis() as u64,
            failures_in_window: st.failures(),
            calls_in_window: st.outcomes.len() as u32,
            consecutive_failures: st.consecutive_failures,
            open_remaining_ms,
            times_opened: st.times_opened,
        }
    }
}
