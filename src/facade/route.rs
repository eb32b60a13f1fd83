use crate::batch::BatchSubmitter;
use crate::resilience::rate_limiter::EndpointClass;
use crate::upstream::Upstream;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How a route reaches its upstream.
#[derive(Clone)]
pub enum Dispatch {
    /// One upstream call per request, guarded by the route's breaker.
    Direct(Arc<dyn Upstream>),
    /// Requests are aggregated by a batch processor, which guards each flush.
    Batched(Arc<dyn BatchSubmitter>),
}

impl Dispatch {
    pub fn upstream(&self) -> &str {
        match self {
            Dispatch::Direct(u) => u.name(),
            Dispatch::Batched(b) => b.upstream(),
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Direct(u) => f.debug_tuple("Direct").field(&u.name()).finish(),
            Dispatch::Batched(b) => f.debug_tuple("Batched").field(&b.upstream()).finish(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePolicy {
    /// Falls back to the cache's default TTL.
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// One endpoint the middleware fronts.
#[derive(Debug, Clone)]
pub struct EndpointRoute {
    pub name: String,
    pub class: EndpointClass,
    pub dispatch: Dispatch,
    /// Responses are cached only when set.
    pub cache: Option<CachePolicy>,
}

impl EndpointRoute {
    pub fn direct(name: impl Into<String>, class: EndpointClass, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            name: name.into(),
            class,
            dispatch: Dispatch::Direct(upstream),
            cache: None,
        }
    }

    pub fn batched(
        name: impl Into<String>,
        class: EndpointClass,
        submitter: Arc<dyn BatchSubmitter>,
    ) -> Self {
        Self {
            name: name.into(),
            class,
            dispatch: Dispatch::Batched(submitter),
            cache: None,
        }
    }

    pub fn with_cache(mut self, policy: CachePolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    pub fn upstream(&self) -> &str {
        self.dispatch.upstream()
    }
}
