//! Standard error codes for responses produced by the middleware façade.
//!
//! Each [`Error`](crate::Error) variant maps to exactly one code. The code
//! determines the HTTP status, the stable machine-readable identifier and
//! whether the caller should retry.
//!
//! ## Error Code Categories
//!
//! | Prefix | Category    | Description                              |
//! |--------|-------------|------------------------------------------|
//! | E1xxx  | client      | Request-side errors                      |
//! | E2xxx  | capacity    | Admission control and backpressure       |
//! | E3xxx  | upstream    | Provider-side failures and isolation     |
//! | E9xxx  | internal    | Store, configuration and runtime faults  |
//!
//! ## Example
//!
//! ```rust
//! use resilience_core::error_code::StandardErrorCode;
//!
//! let code = StandardErrorCode::RateLimited;
//! assert_eq!(code.code(), "E2001");
//! assert_eq!(code.http_status(), 429);
//! assert!(code.retryable());
//! ```

use crate::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardErrorCode {
    /// E1004: No route registered for the requested endpoint
    NotFound,
    /// E2001: Caller exceeded its sliding-window budget
    RateLimited,
    /// E2002: Resource pool had no free handle within the acquire window
    PoolExhausted,
    /// E3001: Upstream provider returned a failure
    UpstreamFailure,
    /// E3002: Circuit breaker is open for the upstream
    UpstreamUnavailable,
    /// E3003: A deadline elapsed at some suspension point
    Timeout,
    /// E9001: Store backend unreachable (never surfaced directly)
    StoreUnavailable,
    /// E9002: Invalid configuration
    Configuration,
    /// E9999: Anything else
    Internal,
}

impl StandardErrorCode {
    /// Returns the canonical code string (e.g., `"E2001"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "E1004",
            Self::RateLimited => "E2001",
            Self::PoolExhausted => "E2002",
            Self::UpstreamFailure => "E3001",
            Self::UpstreamUnavailable => "E3002",
            Self::Timeout => "E3003",
            Self::StoreUnavailable => "E9001",
            Self::Configuration => "E9002",
            Self::Internal => "E9999",
        }
    }

    /// Returns the standard name (e.g., `"rate_limited"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::PoolExhausted => "pool_exhausted",
            Self::UpstreamFailure => "upstream_failure",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Timeout => "timeout",
            Self::StoreUnavailable => "store_unavailable",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }

    /// Returns whether this error is retryable by default.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::PoolExhausted
                | Self::UpstreamFailure
                | Self::UpstreamUnavailable
                | Self::Timeout
        )
    }

    /// HTTP status the route layer should answer with.
    #[inline]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::RateLimited => 429,
            Self::PoolExhausted | Self::UpstreamUnavailable => 503,
            Self::UpstreamFailure => 502,
            Self::Timeout => 504,
            Self::StoreUnavailable | Self::Configuration | Self::Internal => 500,
        }
    }

    /// Returns the category: `"client"`, `"capacity"`, `"upstream"` or `"internal"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound => "client",
            Self::RateLimited | Self::PoolExhausted => "capacity",
            Self::UpstreamFailure | Self::UpstreamUnavailable | Self::Timeout => "upstream",
            Self::StoreUnavailable | Self::Configuration | Self::Internal => "internal",
        }
    }

    /// Message safe to show to an end user. Never includes upstream or store detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::NotFound => "No such endpoint.",
            Self::RateLimited => "Too many requests. Please slow down.",
            Self::PoolExhausted => "Service is busy. Please retry shortly.",
            Self::UpstreamFailure => "The upstream service failed to process the request.",
            Self::UpstreamUnavailable => "The upstream service is temporarily unavailable.",
            Self::Timeout => "The request timed out.",
            Self::StoreUnavailable | Self::Configuration | Self::Internal => {
                "Internal server error."
            }
        }
    }

    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::RateLimitExceeded { .. } => Self::RateLimited,
            Error::CircuitOpen { .. } => Self::UpstreamUnavailable,
            Error::PoolExhausted { .. } => Self::PoolExhausted,
            Error::Upstream { .. } => Self::UpstreamFailure,
            Error::StoreUnavailable { .. } => Self::StoreUnavailable,
            Error::Timeout { .. } => Self::Timeout,
            Error::Configuration { .. } => Self::Configuration,
            Error::Runtime { .. } | Error::Serialization(_) | Error::Io(_) => Self::Internal,
        }
    }
}

impl fmt::Display for StandardErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
