use super::{ResourceManager, ResourcePool};
use crate::upstream::{Upstream, UpstreamError};
use crate::utils::Deadline;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Request logic that runs on a pooled client handle.
#[async_trait]
pub trait PooledHandler<R>: Send + Sync
where
    R: Send + Sync,
{
    async fn handle(&self, resource: &R, payload: Value) -> std::result::Result<Value, UpstreamError>;
}

/// An [`Upstream`] for non-batchable endpoints: every call checks a handle
/// out of the pool, runs the handler on it and returns the handle.
pub struct PooledUpstream<M, H>
where
    M: ResourceManager,
{
    name: String,
    pool: ResourcePool<M>,
    handler: H,
}

impl<M, H> PooledUpstream<M, H>
where
    M: ResourceManager,
    H: PooledHandler<M::Resource>,
{
    pub fn new(name: impl Into<String>, pool: ResourcePool<M>, handler: H) -> Self {
        Self {
            name: name.into(),
            pool,
            handler,
        }
    }

    pub fn pool(&self) -> &ResourcePool<M> {
        &self.pool
    }
}

#[async_trait]
impl<M, H> Upstream for PooledUpstream<M, H>
where
    M: ResourceManager,
    H: PooledHandler<M::Resource>,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, payload: Value, deadline: Deadline) -> Result<Value> {
        let guard = self.pool.acquire(deadline).await?;
        let operation = format!("upstream '{}'", self.name);
        let outcome = deadline
            .run(&operation, self.handler.handle(&*guard, payload))
            .await?;
        outcome.map_err(|e| e.into_error(&self.name, 1))
    }
}
