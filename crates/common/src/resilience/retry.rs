//! Bounded retry with exponential backoff and jitter
//!
//! [`RetryManager`] re-executes a failing operation up to `max_attempts`
//! times, sleeping `calculate_delay(attempt)` between attempts. Errors the
//! configured [`RetryCondition`] rejects are returned immediately as
//! [`RetryError::NonRetryable`]; running out of attempts yields
//! [`RetryError::Exhausted`] carrying the last error.
//!
//! Both an async entry point (suspending on `tokio::time::sleep`) and a
//! blocking one (`std::thread::sleep`) are provided. Back-off waits are the
//! only suspension points; statistics are updated under a short-lived lock
//! that is never held across a wait or the operation itself.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};

/// Predicate over an operation error deciding whether it may be retried
pub type ErrorPredicate = Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>;

//==============================================================================
// Error Types
//==============================================================================

/// Errors returned by retrying execution
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Every attempt failed with a retryable error
    #[error("Operation failed after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        last_error: E,
    },

    /// The operation failed with an error the retry condition rejects
    #[error(transparent)]
    NonRetryable { source: E },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Whether all attempts were used up
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Number of attempts made, if the error came from exhaustion
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted { attempts, .. } => Some(*attempts),
            Self::NonRetryable { .. } => None,
        }
    }

    /// The last error the operation produced
    pub fn last_error(&self) -> &E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::NonRetryable { source } => source,
        }
    }

    /// Consume the retry error and return the operation's error
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::NonRetryable { source } => source,
        }
    }
}

impl<E> ErrorClassification for RetryError<E>
where
    E: std::error::Error + ErrorClassification + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            // Already retried to the configured limit
            Self::Exhausted { .. } => false,
            Self::NonRetryable { source } => source.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Exhausted { last_error, .. } => last_error.severity().max(ErrorSeverity::Error),
            Self::NonRetryable { source } => source.severity(),
        }
    }

    fn is_critical(&self) -> bool {
        self.last_error().is_critical()
    }

    fn retry_after(&self) -> Option<Duration> {
        self.last_error().retry_after()
    }
}

//==============================================================================
// Retry condition
//==============================================================================

/// Decides which operation errors are worth another attempt
#[derive(Clone, Default)]
pub enum RetryCondition {
    /// Retry every error
    #[default]
    Always,
    /// Retry only errors accepted by the predicate
    Custom(ErrorPredicate),
}

impl fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::Custom(_) => write!(f, "Custom(<function>)"),
        }
    }
}

impl RetryCondition {
    /// Build a condition from an arbitrary predicate
    pub fn custom<P>(predicate: P) -> Self
    where
        P: Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Retry only errors of type `E`
    pub fn only<E>() -> Self
    where
        E: std::error::Error + 'static,
    {
        Self::custom(|error| error.is::<E>())
    }

    /// Retry errors of type `E` that classify as retryable
    pub fn classified<E>() -> Self
    where
        E: std::error::Error + ErrorClassification + 'static,
    {
        Self::custom(|error| error.downcast_ref::<E>().is_some_and(|error| error.is_retryable()))
    }

    pub fn should_retry(&self, error: &(dyn std::error::Error + 'static)) -> bool {
        match self {
            Self::Always => true,
            Self::Custom(predicate) => predicate(error),
        }
    }
}

//==============================================================================
// Configuration
//==============================================================================

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound of the un-jittered delay
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub exponential_base: f64,
    /// Whether to randomize delays
    pub jitter: bool,
    /// Relative width of the jitter band, in `[0, 1]`
    pub jitter_range: f64,
    pub retry_condition: RetryCondition,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            jitter_range: 0.1,
            retry_condition: RetryCondition::Always,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> CommonResult<()> {
        if self.max_attempts == 0 {
            return Err(CommonError::config_field("max_attempts", "must be at least 1"));
        }

        if self.max_delay < self.initial_delay {
            return Err(CommonError::config_field(
                "max_delay",
                "must be greater than or equal to initial_delay",
            ));
        }

        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(CommonError::config_field("exponential_base", "must be at least 1.0"));
        }

        if !(0.0..=1.0).contains(&self.jitter_range) {
            return Err(CommonError::config_field("jitter_range", "must be between 0.0 and 1.0"));
        }

        Ok(())
    }

    /// Delay to wait after the attempt with 0-based index `attempt` fails
    ///
    /// `min(initial_delay × exponential_base^attempt, max_delay)`, then
    /// scaled by a factor drawn uniformly from `[1 − jitter_range, 1 +
    /// jitter_range]` when jitter is enabled.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let max_secs = self.max_delay.as_secs_f64();
        let growth = self.exponential_base.powi(exponent);
        let base_secs = if growth.is_finite() {
            (self.initial_delay.as_secs_f64() * growth).min(max_secs)
        } else {
            max_secs
        };

        let secs = if self.jitter && self.jitter_range > 0.0 {
            let factor = rand::thread_rng()
                .gen_range((1.0 - self.jitter_range)..=(1.0 + self.jitter_range));
            base_secs * factor
        } else {
            base_secs
        };

        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total attempts, including the first
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Delay before the first retry
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    /// Cap on the un-jittered delay
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Per-attempt delay multiplier
    pub fn exponential_base(mut self, base: f64) -> Self {
        self.config.exponential_base = base;
        self
    }

    /// Enable jitter with the given relative band
    pub fn jitter_range(mut self, range: f64) -> Self {
        self.config.jitter = true;
        self.config.jitter_range = range;
        self
    }

    /// Use the exact exponential delays
    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = false;
        self
    }

    /// Replace the condition deciding which errors are retried
    pub fn retry_condition(mut self, condition: RetryCondition) -> Self {
        self.config.retry_condition = condition;
        self
    }

    /// Retry only errors accepted by `predicate`
    pub fn retry_if<P>(self, predicate: P) -> Self
    where
        P: Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.retry_condition(RetryCondition::custom(predicate))
    }

    /// Retry only errors of type `E` that classify as retryable
    pub fn retry_classified<E>(self) -> Self
    where
        E: std::error::Error + ErrorClassification + 'static,
    {
        self.retry_condition(RetryCondition::classified::<E>())
    }

    pub fn build(self) -> CommonResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//==============================================================================
// Statistics
//==============================================================================

/// Cumulative retry statistics of one manager
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryStats {
    /// Executions started, regardless of attempts
    pub total_calls: u64,
    /// Executions that eventually succeeded
    pub successful_calls: u64,
    /// Executions that exhausted or hit a non-retryable error
    pub failed_calls: u64,
    /// Extra attempts made after a failure
    pub total_retries: u64,
    /// Distinct kinds of error seen across all attempts
    pub exceptions_caught: BTreeSet<String>,
}

impl RetryStats {
    /// Percentage of calls that eventually succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.successful_calls as f64 / self.total_calls as f64 * 100.0
    }
}

/// Error kind label: the short type name, plus the enum variant when the
/// error's `Debug` output starts with one
///
/// `FlakyError::Transient("x")` yields `FlakyError::Transient`; a plain
/// struct error yields just its type name.
pub(crate) fn error_kind<E: fmt::Debug>(error: &E) -> String {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    let type_name = base.rsplit("::").next().unwrap_or(base);

    let debug = format!("{error:?}");
    let variant: &str = debug
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or_default();

    if variant == type_name || !variant.starts_with(|c: char| c.is_ascii_uppercase()) {
        type_name.to_string()
    } else {
        format!("{type_name}::{variant}")
    }
}

enum Step<E>
where
    E: std::error::Error + 'static,
{
    Retry(Duration),
    Stop(RetryError<E>),
}

//==============================================================================
// Retry manager
//==============================================================================

/// Re-executes failing operations according to a [`RetryConfig`]
///
/// A manager is owned by the call site that built it; wrap it in `Arc` to
/// share statistics between tasks.
#[derive(Debug)]
pub struct RetryManager {
    config: RwLock<RetryConfig>,
    stats: Mutex<RetryStats>,
}

impl RetryManager {
    /// Create a manager from a validated configuration
    pub fn new(config: RetryConfig) -> CommonResult<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    /// Create a manager with the default configuration
    pub fn with_defaults() -> Self {
        Self::from_config(RetryConfig::default())
    }

    fn from_config(config: RetryConfig) -> Self {
        Self { config: RwLock::new(config), stats: Mutex::new(RetryStats::default()) }
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> RetryConfig {
        self.config.read().clone()
    }

    pub(crate) fn update_config(&self, update: impl FnOnce(&mut RetryConfig)) {
        update(&mut self.config.write());
    }

    /// Snapshot of the cumulative statistics
    pub fn stats(&self) -> RetryStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = RetryStats::default();
    }

    /// Delay after the attempt with 0-based index `attempt`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.config.read().calculate_delay(attempt)
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of
    /// attempts, suspending between attempts
    #[instrument(skip_all)]
    pub async fn execute_with_retry<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let config = self.begin_call();
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    self.record_success(attempt);
                    return Ok(value);
                }
                Err(error) => match self.after_failure(&config, attempt, error) {
                    Step::Retry(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Step::Stop(error) => return Err(error),
                },
            }
        }
    }

    /// Blocking counterpart of [`execute_with_retry`](Self::execute_with_retry)
    ///
    /// Sleeps the current thread between attempts; do not call it from an
    /// async task.
    pub fn execute_with_retry_blocking<F, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: std::error::Error + 'static,
    {
        let config = self.begin_call();
        let mut attempt = 0;

        loop {
            match operation() {
                Ok(value) => {
                    self.record_success(attempt);
                    return Ok(value);
                }
                Err(error) => match self.after_failure(&config, attempt, error) {
                    Step::Retry(delay) => {
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    Step::Stop(error) => return Err(error),
                },
            }
        }
    }

    /// Wrap `operation` so every invocation goes through this manager
    pub fn wrap<F>(self, operation: F) -> Retrying<F> {
        Retrying { manager: Arc::new(self), operation }
    }

    fn begin_call(&self) -> RetryConfig {
        self.stats.lock().total_calls += 1;
        self.config()
    }

    fn record_success(&self, attempt: u32) {
        self.stats.lock().successful_calls += 1;
        if attempt > 0 {
            debug!(retries = attempt, "Operation succeeded after retries");
        }
    }

    fn after_failure<E>(&self, config: &RetryConfig, attempt: u32, error: E) -> Step<E>
    where
        E: std::error::Error + 'static,
    {
        let mut stats = self.stats.lock();
        stats.exceptions_caught.insert(error_kind(&error));

        if !config.retry_condition.should_retry(&error) {
            stats.failed_calls += 1;
            debug!(attempt = attempt + 1, error = %error, "Error is not retryable");
            return Step::Stop(RetryError::NonRetryable { source: error });
        }

        if attempt + 1 < config.max_attempts {
            stats.total_retries += 1;
            let delay = config.calculate_delay(attempt);
            warn!(
                attempt = attempt + 1,
                max_attempts = config.max_attempts,
                ?delay,
                error = %error,
                "Operation failed, retrying"
            );
            return Step::Retry(delay);
        }

        stats.failed_calls += 1;
        warn!(attempts = config.max_attempts, error = %error, "All retry attempts exhausted");
        Step::Stop(RetryError::Exhausted { attempts: config.max_attempts, last_error: error })
    }
}

/// Retry an operation through a fresh manager built from `config`
pub fn with_retry<F>(config: RetryConfig, operation: F) -> CommonResult<Retrying<F>> {
    Ok(RetryManager::new(config)?.wrap(operation))
}

/// An operation bound to the retry manager that governs it
///
/// Arguments passed to [`call`](Self::call) are handed unchanged to every
/// attempt; use a tuple for multiple arguments.
pub struct Retrying<F> {
    manager: Arc<RetryManager>,
    operation: F,
}

impl<F> fmt::Debug for Retrying<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrying").field("manager", &self.manager).finish_non_exhaustive()
    }
}

impl<F> Retrying<F> {
    /// The manager holding this operation's retry statistics
    pub fn manager(&self) -> &Arc<RetryManager> {
        &self.manager
    }

    /// Invoke the wrapped operation with retries, blocking between attempts
    pub fn call<A, T, E>(&self, args: A) -> Result<T, RetryError<E>>
    where
        F: Fn(A) -> Result<T, E>,
        A: Clone,
        E: std::error::Error + 'static,
    {
        self.manager.execute_with_retry_blocking(|| (self.operation)(args.clone()))
    }

    /// Invoke the wrapped async operation with retries
    pub async fn call_async<A, Fut, T, E>(&self, args: A) -> Result<T, RetryError<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        A: Clone,
        E: std::error::Error + 'static,
    {
        self.manager.execute_with_retry(|| (self.operation)(args.clone())).await
    }
}
