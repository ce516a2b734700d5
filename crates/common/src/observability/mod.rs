//! Logging setup and structured outcome helpers
//!
//! Components log through `tracing` macros with structured fields; this
//! module only installs a subscriber and provides the shared outcome helper
//! used by call sites that run governed operations.

use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::correlation::CorrelationStatus;

/// Install the global fmt subscriber
///
/// `RUST_LOG` takes precedence over `config.level`. Returns `false` when a
/// global subscriber was already installed, which leaves that one in place.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    installed.is_ok()
}

/// Log the outcome of a governed operation with structured fields.
///
/// `operation` should be a stable identifier without sensitive data.
#[inline]
pub fn log_operation_outcome(
    operation: &str,
    correlation_id: &str,
    elapsed: Duration,
    status: CorrelationStatus,
) {
    let duration_ms = elapsed.as_millis() as u64;

    if status == CorrelationStatus::Completed {
        info!(operation, correlation_id, duration_ms, %status, "operation_succeeded");
    } else {
        warn!(operation, correlation_id, duration_ms, %status, "operation_failed");
    }
}
