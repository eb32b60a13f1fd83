//! # Telemetry Module
//!
//! Logging setup and point-in-time snapshots of the resilience components.
//!
//! Everything in the crate logs through `tracing`; nothing is printed unless
//! the application installs a subscriber, either its own or the one from
//! [`init_tracing`].
//!
//! | Event | Level |
//! |-------|-------|
//! | distributed store fallback | `warn` |
//! | rate limiter failing open | `warn`, `security_event = true` |
//! | circuit transitions | `info` |
//! | pool retirements | `debug` |

mod signals;

pub use signals::{BatchSignals, SignalsSnapshot};

use crate::{Error, ErrorContext, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a compact `fmt` subscriber filtered by `RUST_LOG`, or by
/// `default_filter` when `RUST_LOG` is unset.
///
/// Calling it again, or after another subscriber was installed, is a no-op.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| {
            Error::configuration_with_context(
                format!("invalid log filter: {e}"),
                ErrorContext::new()
                    .with_field_path("RUST_LOG")
                    .with_source("telemetry"),
            )
        })?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).compact())
        .try_init()
        .ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        assert!(init_tracing("resilience_core=debug").is_ok());
        assert!(init_tracing("resilience_core=info").is_ok());
    }
}
