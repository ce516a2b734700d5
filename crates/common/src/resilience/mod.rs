//! Resilience patterns for governed operations
//!
//! - **Circuit Breaker**: stops calling a dependency that keeps failing and
//!   tries it again after a recovery window
//! - **Breaker registry**: one shared breaker per named dependency
//! - **Retry**: bounded re-execution with exponential backoff and jitter
//! - **Adaptive retry**: a retry manager that retunes its schedule from
//!   recent outcomes
//!
//! The pieces compose. A typical call path retries an operation whose every
//! attempt goes through a named breaker:
//!
//! ```rust
//! use std::time::Duration;
//!
//! use warden_common::resilience::{
//!     BreakerError, CircuitBreakerManager, RetryCondition, RetryConfig, RetryManager,
//! };
//! use warden_common::testing::FlakyError;
//!
//! let breakers = CircuitBreakerManager::new();
//! let breaker = breakers.register("policy-check", None)?;
//! let retry = RetryManager::new(
//!     RetryConfig::builder()
//!         .initial_delay(Duration::from_millis(1))
//!         .max_delay(Duration::from_millis(10))
//!         .retry_condition(RetryCondition::custom(|e| {
//!             e.downcast_ref::<BreakerError<FlakyError>>().is_some_and(|e| e.is_circuit_open())
//!         }))
//!         .build()?,
//! )?;
//!
//! let verdict = retry.execute_with_retry_blocking(|| breaker.call(|| Ok::<_, FlakyError>("allow")));
//! assert_eq!(verdict.unwrap(), "allow");
//! # Ok::<(), warden_common::CommonError>(())
//! ```

pub mod adaptive;
pub mod circuit_breaker;
pub mod manager;
pub mod retry;

pub use adaptive::{AdaptiveRetryManager, AdaptiveSettings};
pub use circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerStats, CircuitState, FailurePredicate, StateTransition,
};
pub use manager::{global_breakers, CircuitBreakerManager};
pub use retry::{
    with_retry, ErrorPredicate, RetryCondition, RetryConfig, RetryConfigBuilder, RetryError,
    RetryManager, RetryStats, Retrying,
};
