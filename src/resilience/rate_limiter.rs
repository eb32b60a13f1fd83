use super::backoff::{BackoffPolicy, BackoffState};
use crate::store::Store;
use crate::utils::now_millis;
use crate::{Error, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const LOCK_STRIPES: usize = 64;

/// Endpoint families with independently tuned limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    Auth,
    AiGeneration,
    Search,
    Write,
    Default,
}

impl EndpointClass {
    pub const ALL: [EndpointClass; 5] = [
        Self::Auth,
        Self::AiGeneration,
        Self::Search,
        Self::Write,
        Self::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::AiGeneration => "ai_generation",
            Self::Search => "search",
            Self::Write => "write",
            Self::Default => "default",
        }
    }

    /// Unknown names fall into [`EndpointClass::Default`].
    pub fn parse(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == name)
            .unwrap_or(Self::Default)
    }

    pub fn default_policy(&self) -> RateLimitPolicy {
        let per_minute = match self {
            Self::Auth => 5,
            Self::AiGeneration => 10,
            Self::Search => 60,
            Self::Write => 30,
            Self::Default => 100,
        };
        RateLimitPolicy::new(per_minute, Duration::from_secs(60))
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking, and for what kind of endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub identity: String,
    pub class: EndpointClass,
}

impl RateLimitKey {
    pub fn new(identity: impl Into<String>, class: EndpointClass) -> Self {
        Self {
            identity: identity.into(),
            class,
        }
    }

    pub fn window_key(&self) -> String {
        format!("rl:{}:{}", self.class, self.identity)
    }

    pub fn backoff_key(&self) -> String {
        format!("rl:{}:{}:backoff", self.class, self.identity)
    }

    fn stripe(&self) -> usize {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        (hasher.finish() as usize) % LOCK_STRIPES
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u64,
    pub window: Duration,
    pub backoff: BackoffPolicy,
}

impl RateLimitPolicy {
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    pub policies: HashMap<EndpointClass, RateLimitPolicy>,
    /// Identities (resolved keys such as `user:admin`) that skip limiting entirely.
    pub allowlist: HashSet<String>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policies: EndpointClass::ALL
                .into_iter()
                .map(|c| (c, c.default_policy()))
                .collect(),
            allowlist: HashSet::new(),
        }
    }
}

impl RateLimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_policy(mut self, class: EndpointClass, policy: RateLimitPolicy) -> Self {
        self.policies.insert(class, policy);
        self
    }

    pub fn with_allowlisted(mut self, identity: impl Into<String>) -> Self {
        self.allowlist.insert(identity.into());
        self
    }
}

/// Outcome of one admission check. Denials are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch ms at which the window frees a slot (or the block ends).
    pub reset_at_ms: u64,
    pub retry_after_ms: Option<u64>,
    /// Allowlisted or limiter disabled; nothing was recorded.
    pub bypassed: bool,
    /// Store failed and the request was let through.
    pub degraded: bool,
}

impl RateLimitDecision {
    fn bypass(policy: &RateLimitPolicy, now_ms: u64) -> Self {
        Self {
            allowed: true,
            limit: policy.max_requests,
            remaining: policy.max_requests,
            reset_at_ms: now_ms + policy.window_ms(),
            retry_after_ms: None,
            bypassed: true,
            degraded: false,
        }
    }

    fn fail_open(policy: &RateLimitPolicy, now_ms: u64) -> Self {
        Self {
            bypassed: false,
            degraded: true,
            ..Self::bypass(policy, now_ms)
        }
    }

    fn deny(policy: &RateLimitPolicy, now_ms: u64, retry_after_ms: u64) -> Self {
        let retry_after_ms = retry_after_ms.max(1);
        Self {
            allowed: false,
            limit: policy.max_requests,
            remaining: 0,
            reset_at_ms: now_ms + retry_after_ms,
            retry_after_ms: Some(retry_after_ms),
            bypassed: false,
            degraded: false,
        }
    }

    /// `Retry-After` value: whole seconds, rounded up, at least one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after_ms.map(|ms| ms.div_ceil(1000).max(1))
    }

    /// Standard rate-limit response headers for this decision.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at_ms.div_ceil(1000).to_string()),
        ];
        if let Some(secs) = self.retry_after_secs() {
            headers.push(("Retry-After", secs.to_string()));
        }
        headers
    }

    /// Turn a denial into [`Error::RateLimitExceeded`].
    pub fn into_result(self) -> Result<Self> {
        if self.allowed {
            return Ok(self);
        }
        Err(Error::RateLimitExceeded {
            limit: self.limit,
            remaining: self.remaining,
            reset_at_ms: self.reset_at_ms,
            retry_after_ms: self.retry_after_ms.unwrap_or(1),
        })
    }
}

/// Sliding-window limiter with an exponential block for repeat offenders.
///
/// Window accounting is delegated to [`Store::check_window`], which is atomic
/// per key. Backoff state is read, updated and written back under a striped
/// in-process lock so concurrent checks for one key in this process observe
/// each other's violations.
///
/// That lock does not span instances. Two instances sharing a Redis store
/// that deny the same key at the same moment may both write back one extra
/// violation instead of two, so the block can start one violation late.
/// Admission itself stays exact because the window check is atomic.
///
/// Any store error makes the limiter fail open.
pub struct RateLimiter {
    store: Arc<dyn Store>,
    enabled: bool,
    policies: ArcSwap<HashMap<EndpointClass, RateLimitPolicy>>,
    allowlist: ArcSwap<HashSet<String>>,
    stripes: Vec<Mutex<()>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, cfg: RateLimiterConfig) -> Self {
        Self {
            store,
            enabled: cfg.enabled,
            policies: ArcSwap::from_pointee(cfg.policies),
            allowlist: ArcSwap::from_pointee(cfg.allowlist),
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn policy(&self, class: EndpointClass) -> RateLimitPolicy {
        self.policies
            .load()
            .get(&class)
            .cloned()
            .unwrap_or_else(|| class.default_policy())
    }

    /// Replace one class's policy; in-flight checks keep the old one.
    pub fn update_policy(&self, class: EndpointClass, policy: RateLimitPolicy) {
        self.policies.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(class, policy.clone());
            next
        });
    }

    pub fn allow_identity(&self, identity: impl Into<String>) {
        let identity = identity.into();
        self.allowlist.rcu(|current| {
            let mut next = HashSet::clone(current);
            next.insert(identity.clone());
            next
        });
    }

    pub fn is_allowlisted(&self, identity: &str) -> bool {
        self.allowlist.load().contains(identity)
    }

    pub async fn check(&self, key: &RateLimitKey) -> RateLimitDecision {
        let policy = self.policy(key.class);
        let now_ms = now_millis();
        if !self.enabled || self.is_allowlisted(&key.identity) {
            return RateLimitDecision::bypass(&policy, now_ms);
        }

        let _guard = self.stripes[key.stripe()].lock().await;
        match self.check_locked(key, &policy, now_ms).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    security_event = true,
                    identity = %key.identity,
                    class = %key.class,
                    error = %e,
                    "rate limiter store unavailable, failing open"
                );
                RateLimitDecision::fail_open(&policy, now_ms)
            }
        }
    }

    async fn check_locked(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        now_ms: u64,
    ) -> Result<RateLimitDecision> {
        let window_ms = policy.window_ms();
        let mut backoff = self.load_backoff(key).await?;
        if backoff.is_quiet(now_ms, window_ms) {
            backoff = BackoffState::default();
            self.store.delete(&key.backoff_key()).await?;
        }

        if let Some(remaining) = backoff.block_remaining_ms(now_ms) {
            backoff.register_violation(now_ms, &policy.backoff);
            self.save_backoff(key, &backoff, policy, now_ms).await?;
            let retry = backoff.block_remaining_ms(now_ms).unwrap_or(remaining);
            debug!(identity = %key.identity, class = %key.class, retry_ms = retry, "blocked caller denied");
            return Ok(RateLimitDecision::deny(policy, now_ms, retry));
        }

        let window = self
            .store
            .check_window(&key.window_key(), now_ms, policy.window, policy.max_requests)
            .await?;

        if window.recorded {
            let oldest = window.oldest_ms.unwrap_or(now_ms);
            return Ok(RateLimitDecision {
                allowed: true,
                limit: policy.max_requests,
                remaining: policy.max_requests.saturating_sub(window.count),
                reset_at_ms: (oldest + window_ms).max(now_ms),
                retry_after_ms: None,
                bypassed: false,
                degraded: false,
            });
        }

        let window_retry = window
            .oldest_ms
            .map(|oldest| (oldest + window_ms).saturating_sub(now_ms))
            .unwrap_or(window_ms);
        backoff.register_violation(now_ms, &policy.backoff);
        self.save_backoff(key, &backoff, policy, now_ms).await?;
        let retry = window_retry.max(backoff.block_remaining_ms(now_ms).unwrap_or(0));
        debug!(
            identity = %key.identity,
            class = %key.class,
            violations = backoff.consecutive_violations,
            retry_ms = retry,
            "rate limit exceeded"
        );
        Ok(RateLimitDecision::deny(policy, now_ms, retry))
    }

    /// Current backoff record for `key`, if any.
    pub async fn backoff_state(&self, key: &RateLimitKey) -> Result<BackoffState> {
        self.load_backoff(key).await
    }

    /// Forget the window and backoff record for `key`.
    pub async fn reset(&self, key: &RateLimitKey) -> Result<()> {
        let _guard = self.stripes[key.stripe()].lock().await;
        self.store.delete(&key.window_key()).await?;
        self.store.delete(&key.backoff_key()).await?;
        Ok(())
    }

    async fn load_backoff(&self, key: &RateLimitKey) -> Result<BackoffState> {
        match self.store.get(&key.backoff_key()).await? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(BackoffState::default()),
        }
    }

    async fn save_backoff(
        &self,
        key: &RateLimitKey,
        state: &BackoffState,
        policy: &RateLimitPolicy,
        now_ms: u64,
    ) -> Result<()> {
        // Outlive both the block and the quiet window that forgives it.
        let ttl_ms = state.block_remaining_ms(now_ms).unwrap_or(0) + policy.window_ms() * 2;
        let raw = serde_json::to_vec(state)?;
        self.store
            .set(&key.backoff_key(), &raw, Duration::from_millis(ttl_ms.max(1_000)), &[])
            .await
    }
}
