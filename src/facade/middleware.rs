use super::context::ResilienceContext;
use super::identity::Identity;
use super::response::MiddlewareResponse;
use super::route::{Dispatch, EndpointRoute};
use crate::cache::{CacheKey, Invalidation};
use crate::error_code::StandardErrorCode;
use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::rate_limiter::{EndpointClass, RateLimitKey};
use crate::telemetry::{BatchSignals, SignalsSnapshot};
use crate::utils::Deadline;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One call from a route handler.
#[derive(Debug, Clone)]
pub struct MiddlewareRequest {
    pub route: String,
    pub identity: Identity,
    /// Overrides the route's endpoint class for rate limiting.
    pub endpoint_class: Option<EndpointClass>,
    pub payload: Value,
    /// Derived from the payload when absent.
    pub cache_key: Option<CacheKey>,
    /// Added to the route's cache tags when the response is stored.
    pub cache_tags: Vec<String>,
    pub deadline: Deadline,
}

impl MiddlewareRequest {
    pub fn new(route: impl Into<String>, identity: Identity, payload: Value) -> Self {
        Self {
            route: route.into(),
            identity,
            endpoint_class: None,
            payload,
            cache_key: None,
            cache_tags: Vec::new(),
            deadline: Deadline::none(),
        }
    }

    pub fn with_endpoint_class(mut self, class: EndpointClass) -> Self {
        self.endpoint_class = Some(class);
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<CacheKey>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn with_cache_tag(mut self, tag: impl Into<String>) -> Self {
        self.cache_tags.push(tag.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }
}

/// The single entry point route handlers call.
///
/// Pipeline: cache lookup, rate limit, circuit breaker, then the route's
/// pooled or batched upstream. Successful responses are written through to
/// the cache; failures are mapped to status codes with retry hints.
pub struct Middleware {
    ctx: Arc<ResilienceContext>,
    routes: HashMap<String, EndpointRoute>,
}

impl Middleware {
    pub fn new(ctx: Arc<ResilienceContext>) -> Self {
        Self {
            ctx,
            routes: HashMap::new(),
        }
    }

    /// Register `route`; its upstream's breaker is created now.
    pub fn with_route(mut self, route: EndpointRoute) -> Self {
        self.ctx.breakers().register([route.upstream()]);
        self.routes.insert(route.name.clone(), route);
        self
    }

    pub fn context(&self) -> &Arc<ResilienceContext> {
        &self.ctx
    }

    pub fn route(&self, name: &str) -> Option<&EndpointRoute> {
        self.routes.get(name)
    }

    pub async fn handle(&self, req: MiddlewareRequest) -> MiddlewareResponse {
        let Some(route) = self.routes.get(&req.route) else {
            debug!(route = %req.route, "no such route");
            return MiddlewareResponse::from_code(StandardErrorCode::NotFound);
        };
        let deadline = match req.deadline.instant() {
            Some(_) => req.deadline,
            None => Deadline::after(self.ctx.config().default_timeout()),
        };

        let cache_key = route.cache.as_ref().map(|_| {
            req.cache_key
                .clone()
                .unwrap_or_else(|| self.ctx.key_generator().generate(&route.name, &req.payload))
        });
        if let Some(ref key) = cache_key {
            if let Some(hit) = self.ctx.cache().get(key).await {
                debug!(route = %route.name, key = %key, tier = ?hit.tier, "served from cache");
                return MiddlewareResponse::cached(hit.value, hit.tier);
            }
        }

        let class = req.endpoint_class.unwrap_or(route.class);
        let decision = self
            .ctx
            .limiter()
            .check(&RateLimitKey::new(req.identity.as_str(), class))
            .await;
        if !decision.allowed {
            debug!(
                identity = %req.identity,
                class = %class,
                retry_after_ms = decision.retry_after_ms,
                "request rate limited"
            );
            return MiddlewareResponse::rate_limited(&decision);
        }

        let outcome = self.dispatch(route, req.payload, deadline).await;
        let response = match outcome {
            Ok(value) => {
                if let (Some(key), Some(policy)) = (cache_key.as_ref(), route.cache.as_ref()) {
                    let mut tags = policy.tags.clone();
                    tags.extend(req.cache_tags.iter().cloned());
                    if let Err(e) = self.ctx.cache().set(key, &value, policy.ttl, &tags).await {
                        warn!(route = %route.name, error = %e, "failed to cache response");
                    }
                }
                MiddlewareResponse::ok(value)
            }
            Err(e) => {
                warn!(
                    route = %route.name,
                    upstream = route.upstream(),
                    code = e.code().code(),
                    error = %e,
                    "request failed"
                );
                MiddlewareResponse::from_error(&e)
            }
        };
        response.with_rate_limit_headers(&decision)
    }

    async fn dispatch(&self, route: &EndpointRoute, payload: Value, deadline: Deadline) -> Result<Value> {
        match &route.dispatch {
            Dispatch::Direct(upstream) => {
                let breaker = self.ctx.breaker(route.upstream());
                // The deadline runs under the permit so a hung upstream is recorded as a failure.
                breaker
                    .call(|| async move {
                        deadline
                            .run("request", upstream.call(payload, deadline))
                            .await
                            .and_then(|outcome| outcome)
                    })
                    .await
            }
            Dispatch::Batched(submitter) => {
                // Fail fast instead of queueing behind an open circuit.
                let breaker = submitter.breaker();
                if breaker.state() == CircuitState::Open {
                    let snapshot = breaker.snapshot();
                    return Err(Error::CircuitOpen {
                        upstream: route.upstream().to_string(),
                        retry_after_ms: snapshot.open_remaining_ms.unwrap_or(0),
                    });
                }
                submitter.submit_value(payload, deadline).await
            }
        }
    }

    pub async fn invalidate_tag(&self, tag: &str) -> Invalidation {
        self.ctx.cache().invalidate_tag(tag).await
    }

    pub fn signals(&self) -> SignalsSnapshot {
        let mut batches: Vec<BatchSignals> = Vec::new();
        for route in self.routes.values() {
            if let Dispatch::Batched(submitter) = &route.dispatch {
                if batches.iter().any(|b| b.upstream == submitter.upstream()) {
                    continue;
                }
                batches.push(BatchSignals {
                    upstream: submitter.upstream().to_string(),
                    pending: submitter.pending(),
                    stats: submitter.stats(),
                });
            }
        }
        batches.sort_by(|a, b| a.upstream.cmp(&b.upstream));

        let store = self.ctx.store();
        SignalsSnapshot {
            store_mode: store.mode(),
            store_fallbacks: store.fallback_count(),
            circuit_breakers: self.ctx.breakers().snapshots(),
            pools: self.ctx.pool_stats(),
            batches,
            cache: Some(self.ctx.cache().stats()),
        }
    }
}
