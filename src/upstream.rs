//! Contracts for the opaque providers the core protects.

use crate::utils::Deadline;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;

/// Failure reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub message: String,
    pub retryable: bool,
}

impl UpstreamError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn into_error(self, upstream: &str, attempts: u32) -> Error {
        Error::Upstream {
            upstream: upstream.to_string(),
            message: self.message,
            retryable: self.retryable,
            attempts,
        }
    }
}

/// A single-request provider call.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Name used for the breaker and in errors.
    fn name(&self) -> &str;

    async fn call(&self, payload: Value, deadline: Deadline) -> Result<Value>;
}

/// A provider that accepts many items in one call and answers per item.
///
/// `R` is the pooled client handle the call runs on.
#[async_trait]
pub trait BatchUpstream<R>: Send + Sync
where
    R: Send + Sync,
{
    type Item: Clone + Send + Sync + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &str;

    /// Results must line up with `items`. An `Err` for the whole call means
    /// no item was processed.
    async fn call_batch(
        &self,
        resource: &R,
        items: &[Self::Item],
    ) -> std::result::Result<Vec<std::result::Result<Self::Output, UpstreamError>>, UpstreamError>;
}

/// [`Upstream`] built from an async closure.
pub struct FnUpstream<F, Fut> {
    name: String,
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap `f` as an [`Upstream`]; the deadline is enforced around each call.
pub fn upstream_fn<F, Fut>(name: impl Into<String>, f: F) -> FnUpstream<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, UpstreamError>> + Send,
{
    FnUpstream {
        name: name.into(),
        f,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> Upstream for FnUpstream<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, UpstreamError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, payload: Value, deadline: Deadline) -> Result<Value> {
        let operation = format!("upstream '{}'", self.name);
        let outcome = deadline.run(&operation, (self.f)(payload)).await?;
        outcome.map_err(|e| e.into_error(&self.name, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fn_upstream_maps_errors() {
        let up = upstream_fn("ai", |payload: Value| async move {
            if payload["ok"].as_bool() == Some(true) {
                Ok(json!({"answer": 42}))
            } else {
                Err(UpstreamError::permanent("rejected"))
            }
        });
        assert_eq!(
            up.call(json!({"ok": true}), Deadline::none()).await.unwrap(),
            json!({"answer": 42})
        );
        match up.call(json!({}), Deadline::none()).await {
            Err(Error::Upstream { upstream, retryable, .. }) => {
                assert_eq!(upstream, "ai");
                assert!(!retryable);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fn_upstream_honours_deadline() {
        let up = upstream_fn("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        });
        let r = up.call(Value::Null, Deadline::after(Duration::from_millis(50))).await;
        assert!(matches!(r, Err(Error::Timeout { .. })));
    }
}
