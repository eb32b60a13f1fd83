use crate::error_code::StandardErrorCode;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "pool.max_size")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_validator", "batch_processor")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the resilience core.
///
/// The first six variants are the caller-facing taxonomy; the rest are
/// internal plumbing failures that the façade maps to an opaque 500.
#[derive(Debug, Error)]
pub enum Error {
    #[error("rate limit exceeded: {remaining}/{limit} remaining, retry after {retry_after_ms}ms")]
    RateLimitExceeded {
        limit: u64,
        remaining: u64,
        reset_at_ms: u64,
        retry_after_ms: u64,
    },

    #[error("circuit open for upstream '{upstream}', retry after {retry_after_ms}ms")]
    CircuitOpen { upstream: String, retry_after_ms: u64 },

    #[error("resource pool '{pool}' exhausted ({waiters} waiting)")]
    PoolExhausted { pool: String, waiters: usize },

    #[error("upstream '{upstream}' failed after {attempts} attempt(s): {message}")]
    Upstream {
        upstream: String,
        message: String,
        retryable: bool,
        attempts: u32,
    },

    #[error("store backend '{backend}' unavailable: {message}")]
    StoreUnavailable {
        backend: &'static str,
        message: String,
    },

    #[error("deadline exceeded during {operation}")]
    Timeout { operation: String },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Error::Timeout {
            operation: operation.into(),
        }
    }

    pub fn store_unavailable(backend: &'static str, message: impl Into<String>) -> Self {
        Error::StoreUnavailable {
            backend,
            message: message.into(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Standard code for this error, used for response mapping.
    pub fn code(&self) -> StandardErrorCode {
        StandardErrorCode::from_error(self)
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Upstream { retryable, .. } => *retryable,
            other => other.code().retryable(),
        }
    }

    /// Retry hint in milliseconds, when the error carries one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::RateLimitExceeded { retry_after_ms, .. }
            | Error::CircuitOpen { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Whether this error reflects the health of the upstream itself and
    /// should therefore be counted by a circuit breaker.
    pub fn is_upstream_fault(&self) -> bool {
        matches!(self, Error::Upstream { .. } | Error::Timeout { .. })
    }

    /// Produce an equivalent error for fanning one failure out to many waiters.
    ///
    /// Typed variants are reproduced exactly; wrapped foreign errors collapse
    /// into a runtime error carrying their message.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Error::RateLimitExceeded {
                limit,
                remaining,
                reset_at_ms,
                retry_after_ms,
            } => Error::RateLimitExceeded {
                limit: *limit,
                remaining: *remaining,
                reset_at_ms: *reset_at_ms,
                retry_after_ms: *retry_after_ms,
            },
            Error::CircuitOpen {
                upstream,
                retry_after_ms,
            } => Error::CircuitOpen {
                upstream: upstream.clone(),
                retry_after_ms: *retry_after_ms,
            },
            Error::PoolExhausted { pool, waiters } => Error::PoolExhausted {
                pool: pool.clone(),
                waiters: *waiters,
            },
            Error::Upstream {
                upstream,
                message,
                retryable,
                attempts,
            } => Error::Upstream {
                upstream: upstream.clone(),
                message: message.clone(),
                retryable: *retryable,
                attempts: *attempts,
            },
            Error::StoreUnavailable { backend, message } => Error::StoreUnavailable {
                backend: *backend,
                message: message.clone(),
            },
            Error::Timeout { operation } => Error::Timeout {
                operation: operation.clone(),
            },
            Error::Configuration { message, context } => Error::Configuration {
                message: message.clone(),
                context: context.clone(),
            },
            Error::Runtime { message, context } => Error::Runtime {
                message: message.clone(),
                context: context.clone(),
            },
            other => Error::runtime_with_context(other.to_string(), ErrorContext::new()),
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::store_unavailable("redis", e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::configuration_with_context(
            e.to_string(),
            ErrorContext::new().with_source("config_loader"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_rendered() {
        let err = Error::configuration_with_context(
            "max_size must be positive",
            ErrorContext::new()
                .with_field_path("pool.max_size")
                .with_source("config_validator"),
        );
        let text = err.to_string();
        assert!(text.contains("pool.max_size"));
        assert!(text.contains("config_validator"));
        assert!(err.context().is_some());
    }

    #[test]
    fn test_retry_hints() {
        let err = Error::CircuitOpen {
            upstream: "image-search".into(),
            retry_after_ms: 1200,
        };
        assert_eq!(err.retry_after_ms(), Some(1200));
        assert!(err.is_retryable());
        assert!(!err.is_upstream_fault());

        let err = Error::Upstream {
            upstream: "ai".into(),
            message: "bad prompt".into(),
            retryable: false,
            attempts: 1,
        };
        assert!(!err.is_retryable());
        assert!(err.is_upstream_fault());
    }

    #[test]
    fn test_replicate_preserves_variant() {
        let err = Error::PoolExhausted {
            pool: "ai-clients".into(),
            waiters: 3,
        };
        match err.replicate() {
            Error::PoolExhausted { pool, waiters } => {
                assert_eq!(pool, "ai-clients");
                assert_eq!(waiters, 3);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
