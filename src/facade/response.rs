use crate::cache::CacheTier;
use crate::error_code::StandardErrorCode;
use crate::resilience::rate_limiter::RateLimitDecision;
use crate::Error;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// What the route layer turns into an HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct MiddlewareResponse {
    pub status: u16,
    pub body: Value,
    pub headers: BTreeMap<String, String>,
    pub served_from_cache: bool,
    pub cache_tier: Option<CacheTier>,
}

impl MiddlewareResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            headers: BTreeMap::new(),
            served_from_cache: false,
            cache_tier: None,
        }
    }

    pub fn cached(body: Value, tier: CacheTier) -> Self {
        let mut resp = Self::ok(body);
        resp.served_from_cache = true;
        resp.cache_tier = Some(tier);
        let label = match tier {
            CacheTier::Local => "HIT-LOCAL",
            CacheTier::Distributed => "HIT-DISTRIBUTED",
        };
        resp.headers.insert("X-Cache".to_string(), label.to_string());
        resp
    }

    /// Error body with the public message only; upstream messages, store
    /// addresses and other internals stay in the logs.
    pub fn from_code(code: StandardErrorCode) -> Self {
        let body = json!({
            "error": {
                "code": code.code(),
                "type": code.name(),
                "message": code.public_message(),
                "retryable": code.retryable(),
            }
        });
        Self {
            status: code.http_status(),
            body,
            headers: BTreeMap::new(),
            served_from_cache: false,
            cache_tier: None,
        }
    }

    pub fn from_error(error: &Error) -> Self {
        let code = error.code();
        let mut resp = Self::from_code(code);
        let mut extra = Map::new();
        extra.insert("retryable".into(), Value::Bool(error.is_retryable()));
        if let Some(ms) = error.retry_after_ms() {
            extra.insert("retry_after_ms".into(), json!(ms));
            resp.headers
                .insert("Retry-After".to_string(), ms.div_ceil(1000).max(1).to_string());
        }
        if let Error::RateLimitExceeded {
            limit,
            remaining,
            reset_at_ms,
            ..
        } = error
        {
            extra.insert("limit".into(), json!(limit));
            extra.insert("remaining".into(), json!(remaining));
            extra.insert("reset_time".into(), json!(reset_at_ms.div_ceil(1000)));
        }
        if let Some(Value::Object(obj)) = resp.body.get_mut("error") {
            obj.extend(extra);
        }
        resp
    }

    /// Denial response for a rate-limit decision.
    pub fn rate_limited(decision: &RateLimitDecision) -> Self {
        let error = Error::RateLimitExceeded {
            limit: decision.limit,
            remaining: decision.remaining,
            reset_at_ms: decision.reset_at_ms,
            retry_after_ms: decision.retry_after_ms.unwrap_or(1),
        };
        Self::from_error(&error).with_rate_limit_headers(decision)
    }

    pub fn with_rate_limit_headers(mut self, decision: &RateLimitDecision) -> Self {
        for (name, value) in decision.headers() {
            self.headers.insert(name.to_string(), value);
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
