//! Named circuit breaker guarding a governed operation
//!
//! A breaker counts qualifying failures of the operation it guards and, once
//! `failure_threshold` is reached, rejects calls without invoking the
//! operation until `recovery_timeout` has elapsed. The first call after that
//! window is admitted as a half-open trial; `success_threshold` consecutive
//! trial successes close the circuit again, a single trial failure re-opens
//! it. At most `half_open_max_calls` trials run at the same time; a finished
//! trial frees its slot.
//!
//! All mutable state lives in one struct behind one mutex per breaker.
//! Admission and outcome recording each happen in a single critical section
//! and the lock is never held while the guarded operation runs, so the effect
//! of concurrent calls is always that of some serial ordering.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
use crate::testing::time::{Clock, SystemClock};

/// Decides whether an operation error counts toward the failure threshold
pub type FailurePredicate = Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>;

//==============================================================================
// Error Types
//==============================================================================

/// Errors returned by [`CircuitBreaker::call`] and [`CircuitBreaker::execute`]
#[derive(Debug, Error)]
pub enum BreakerError<E>
where
    E: std::error::Error + 'static,
{
    /// The breaker rejected the call without invoking the operation
    #[error("Circuit breaker '{name}' is open, rejecting calls")]
    CircuitOpen { name: String, retry_after: Option<Duration> },

    /// The guarded operation ran and failed; the error is passed through
    #[error(transparent)]
    Operation(E),
}

impl<E> BreakerError<E>
where
    E: std::error::Error + 'static,
{
    /// Whether the call was rejected by an open circuit
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// The operation's own error, if the operation ran
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            Self::CircuitOpen { .. } => None,
        }
    }
}

impl<E> ErrorClassification for BreakerError<E>
where
    E: std::error::Error + ErrorClassification + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => true,
            Self::Operation(error) => error.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitOpen { .. } => ErrorSeverity::Warning,
            Self::Operation(error) => error.severity(),
        }
    }

    fn is_critical(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => false,
            Self::Operation(error) => error.is_critical(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            Self::Operation(error) => error.retry_after(),
        }
    }
}

impl<E> From<BreakerError<E>> for CommonError
where
    E: std::error::Error + Into<CommonError> + 'static,
{
    fn from(err: BreakerError<E>) -> Self {
        match err {
            BreakerError::CircuitOpen { name, retry_after: Some(retry) } => {
                CommonError::circuit_breaker_with_retry(name, retry)
            }
            BreakerError::CircuitOpen { name, retry_after: None } => {
                CommonError::circuit_breaker(name)
            }
            BreakerError::Operation(error) => error.into(),
        }
    }
}

//==============================================================================
// State and configuration
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    #[default]
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited requests to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
}

/// Configuration for circuit breaker behavior
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive qualifying failures before opening the circuit
    pub failure_threshold: u64,
    /// Time to wait before an open circuit admits a trial call
    pub recovery_timeout: Duration,
    /// Number of consecutive trial successes needed to close the circuit
    pub success_threshold: u64,
    /// Maximum number of trial calls running at once while half-open
    pub half_open_max_calls: u64,
    /// Filter for errors that count as failures; `None` counts every error
    pub failure_predicate: Option<FailurePredicate>,
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .field("success_threshold", &self.success_threshold)
            .field("half_open_max_calls", &self.half_open_max_calls)
            .field("failure_predicate", &self.failure_predicate.as_ref().map(|_| "<function>"))
            .finish()
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
            half_open_max_calls: 3,
            failure_predicate: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> CommonResult<()> {
        if self.failure_threshold == 0 {
            return Err(CommonError::config_field(
                "failure_threshold",
                "must be greater than 0",
            ));
        }

        if self.success_threshold == 0 {
            return Err(CommonError::config_field(
                "success_threshold",
                "must be greater than 0",
            ));
        }

        if self.half_open_max_calls == 0 {
            return Err(CommonError::config_field(
                "half_open_max_calls",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    fn counts_as_failure(&self, error: &(dyn std::error::Error + 'static)) -> bool {
        self.failure_predicate.as_ref().map_or(true, |predicate| predicate(error))
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive failures that open the circuit
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Time an open circuit waits before admitting trials
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Trial successes needed to close the circuit
    pub fn success_threshold(mut self, threshold: u64) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Trial calls allowed in flight while half-open
    pub fn half_open_max_calls(mut self, max_calls: u64) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    /// Count only errors accepted by `predicate` as failures
    pub fn count_failures_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.config.failure_predicate = Some(Arc::new(predicate));
        self
    }

    /// Count only errors of type `E` as failures
    ///
    /// Any other error type passes through the breaker untouched.
    pub fn count_only<E>(self) -> Self
    where
        E: std::error::Error + 'static,
    {
        self.count_failures_when(|error| error.is::<E>())
    }

    /// Count errors of type `E` whose classification is retryable
    ///
    /// Permanent failures (bad input, policy violations) say nothing about
    /// the health of the dependency, so they do not trip the breaker.
    pub fn count_classified<E>(self) -> Self
    where
        E: std::error::Error + ErrorClassification + 'static,
    {
        self.count_failures_when(|error| {
            error.downcast_ref::<E>().is_some_and(|error| error.is_retryable())
        })
    }

    pub fn build(self) -> CommonResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Snapshot of a breaker's counters and history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    /// Consecutive counted failures in the current state
    pub failure_count: u64,
    /// Consecutive trial successes while half-open
    pub success_count: u64,
    /// Every call offered to the breaker, rejected ones included
    pub total_calls: u64,
    pub successful_calls: u64,
    /// Calls whose error counted as a failure
    pub failed_calls: u64,
    /// Calls short-circuited without running the operation
    pub rejected_calls: u64,
    /// Errors that passed through without counting as failures
    pub ignored_failures: u64,
    /// Percentage of all calls that succeeded
    pub success_rate: f64,
    /// Transitions since creation or the last reset, oldest first
    pub state_transitions: Vec<StateTransition>,
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    /// Trial calls currently running in this half-open period
    half_open_calls: u64,
    /// Incremented on every entry into HALF_OPEN
    half_open_period: u64,
    opened_at: Option<Instant>,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
    ignored_failures: u64,
    transitions: Vec<StateTransition>,
}

//==============================================================================
// Circuit breaker
//==============================================================================

/// Circuit breaker guarding one named operation or dependency
///
/// Share a breaker between callers with `Arc`, or register it in a
/// [`CircuitBreakerManager`](super::CircuitBreakerManager).
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> CommonResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }

    /// Create a circuit breaker with the default configuration
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::from_parts(name.into(), CircuitBreakerConfig::default(), SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> CommonResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(name.into(), config, clock))
    }

    fn from_parts(name: String, config: CircuitBreakerConfig, clock: C) -> Self {
        Self { name, config, inner: Mutex::new(BreakerState::default()), clock }
    }

    /// Name used in rejections, logs and manager lookups
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration this breaker was built with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute a synchronous operation with circuit breaker protection
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + 'static,
    {
        let trial = self.acquire()?;
        let result = operation();
        self.settle(trial, result)
    }

    /// Execute an async operation with circuit breaker protection
    #[instrument(skip(self, operation), fields(breaker = %self.name))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let trial = self.acquire()?;
        let result = operation().await;
        self.settle(trial, result)
    }

    /// Record a successful operation observed outside `call`/`execute`
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        self.on_success(&mut inner);
    }

    /// Record a failed operation observed outside `call`/`execute`
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        self.on_failure(&mut inner);
    }

    /// Get the current state of the circuit breaker
    ///
    /// Reading the state never transitions it; an expired open circuit moves
    /// to half-open on the next call attempt.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Time left before an open circuit admits a trial call
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        self.remaining_open(&inner)
    }

    /// Get a snapshot of counters and transition history
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        let success_rate = if inner.total_calls == 0 {
            0.0
        } else {
            inner.successful_calls as f64 / inner.total_calls as f64 * 100.0
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            successful_calls: inner.successful_calls,
            failed_calls: inner.failed_calls,
            rejected_calls: inner.rejected_calls,
            ignored_failures: inner.ignored_failures,
            success_rate,
            state_transitions: inner.transitions.clone(),
        }
    }

    /// Force the breaker closed and clear every counter and the history
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let half_open_period = inner.half_open_period;
        *inner = BreakerState { half_open_period, ..BreakerState::default() };
        info!(breaker = %self.name, "Circuit breaker manually reset to closed state");
    }

    /// Admit a call, returning the half-open period it is a trial of
    fn acquire<E>(&self) -> Result<Option<u64>, BreakerError<E>>
    where
        E: std::error::Error + 'static,
    {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;

        if inner.state == CircuitState::Open {
            match self.remaining_open(&inner) {
                None => self.transition(&mut inner, CircuitState::HalfOpen),
                Some(remaining) => {
                    inner.rejected_calls += 1;
                    debug!(breaker = %self.name, ?remaining, "Circuit breaker rejecting call");
                    return Err(BreakerError::CircuitOpen {
                        name: self.name.clone(),
                        retry_after: Some(remaining),
                    });
                }
            }
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_calls >= self.config.half_open_max_calls {
                inner.rejected_calls += 1;
                debug!(breaker = %self.name, "Half-open trial capacity exhausted, rejecting call");
                return Err(BreakerError::CircuitOpen { name: self.name.clone(), retry_after: None });
            }
            inner.half_open_calls += 1;
            return Ok(Some(inner.half_open_period));
        }

        Ok(None)
    }

    fn settle<T, E>(&self, trial: Option<u64>, result: Result<T, E>) -> Result<T, BreakerError<E>>
    where
        E: std::error::Error + 'static,
    {
        let mut inner = self.inner.lock();
        if trial.is_some_and(|period| {
            inner.state == CircuitState::HalfOpen && inner.half_open_period == period
        }) {
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
        }

        match result {
            Ok(value) => {
                self.on_success(&mut inner);
                Ok(value)
            }
            Err(error) if self.config.counts_as_failure(&error) => {
                self.on_failure(&mut inner);
                warn!(breaker = %self.name, error = %error, "Guarded operation failed");
                Err(BreakerError::Operation(error))
            }
            Err(error) => {
                inner.ignored_failures += 1;
                debug!(breaker = %self.name, error = %error, "Error excluded by failure filter");
                Err(BreakerError::Operation(error))
            }
        }
    }

    fn on_success(&self, inner: &mut BreakerState) {
        inner.successful_calls += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    let successes = inner.success_count;
                    self.transition(inner, CircuitState::Closed);
                    info!(breaker = %self.name, successes, "Circuit breaker closed after trial successes");
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit re-opened finished late
                debug!(breaker = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    fn on_failure(&self, inner: &mut BreakerState) {
        inner.failed_calls += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    let failures = inner.failure_count;
                    self.transition(inner, CircuitState::Open);
                    warn!(breaker = %self.name, failures, "Circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                self.transition(inner, CircuitState::Open);
                warn!(breaker = %self.name, "Circuit breaker re-opened by half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;

        match to {
            CircuitState::Open => {
                inner.opened_at = Some(self.clock.now());
                inner.success_count = 0;
                inner.half_open_calls = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count = 0;
                inner.half_open_calls = 0;
                inner.half_open_period += 1;
                info!(breaker = %self.name, "Circuit breaker half-open, admitting trial calls");
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.half_open_calls = 0;
                inner.opened_at = None;
            }
        }

        inner.transitions.push(StateTransition { from, to, timestamp: self.clock.now_utc() });
    }

    fn remaining_open(&self, inner: &BreakerState) -> Option<Duration> {
        if inner.state != CircuitState::Open {
            return None;
        }
        let opened_at = inner.opened_at?;
        let elapsed = self.clock.now().saturating_duration_since(opened_at);
        self.config.recovery_timeout.checked_sub(elapsed).filter(|left| !left.is_zero())
    }
}
