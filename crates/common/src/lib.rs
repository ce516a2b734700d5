//! Resilience and correlation core for Warden governance operations.
//!
//! Governed operations (agent spawns, validation calls, policy decisions) are
//! composed as *tracked operation → retried → breaker-guarded*:
//!
//! - [`correlation`]: a tracker that records each operation from creation to
//!   a terminal status, with bounded history and snapshot persistence
//! - [`resilience`]: named circuit breakers, a retry manager with
//!   exponential backoff and jitter, and an adaptive retry manager
//! - [`config`]: file and environment configuration for all of the above
//! - [`observability`]: tracing subscriber setup and outcome logging
//!
//! # Feature Tiers
//!
//! - `foundation`: the shared error taxonomy
//! - `runtime` (default): everything else
//! - `test-utils`: temporary persistence directories for tests

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod config;
#[cfg(feature = "runtime")]
pub mod correlation;
#[cfg(feature = "runtime")]
pub mod observability;
#[cfg(feature = "runtime")]
pub mod resilience;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use config::{LoggingConfig, WardenConfig};
#[cfg(feature = "runtime")]
pub use correlation::{
    global_tracker, CorrelationContext, CorrelationStatus, CorrelationTracker, CorrelationUpdate,
    TrackerConfig,
};
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    global_breakers, AdaptiveRetryManager, BreakerError, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerManager, CircuitState, RetryConfig, RetryError, RetryManager,
};
