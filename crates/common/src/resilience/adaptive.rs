//! Retry manager that retunes its backoff from observed outcomes
//!
//! [`AdaptiveRetryManager`] wraps a [`RetryManager`] and records whether
//! each completed call succeeded. Every `adjust_every` completed calls it
//! looks at the last `window` outcomes:
//!
//! - success rate above `high_success_rate`: `initial_delay` shrinks by
//!   `speedup_factor`, never below `min_initial_delay`
//! - success rate below `low_success_rate`: `initial_delay` grows by
//!   `slowdown_factor` up to `max_delay`, and `max_attempts` grows by one up
//!   to `max_attempts_ceiling`
//!
//! Adjustments only ever move in the direction of the observed trend.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::retry::{RetryConfig, RetryError, RetryManager, RetryStats};
use crate::error::{CommonError, CommonResult};

/// Tuning constants for [`AdaptiveRetryManager`]
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveSettings {
    /// Outcomes kept in `success_history`, oldest evicted first
    pub history_capacity: usize,
    /// Number of recent outcomes the success rate is computed over
    pub window: usize,
    /// Completed calls between adjustments
    pub adjust_every: u32,
    pub high_success_rate: f64,
    pub low_success_rate: f64,
    /// Multiplier applied to `initial_delay` when calls mostly succeed
    pub speedup_factor: f64,
    /// Multiplier applied to `initial_delay` when calls mostly fail
    pub slowdown_factor: f64,
    pub min_initial_delay: Duration,
    pub max_attempts_ceiling: u32,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            window: 20,
            adjust_every: 10,
            high_success_rate: 0.9,
            low_success_rate: 0.5,
            speedup_factor: 0.8,
            slowdown_factor: 1.5,
            min_initial_delay: Duration::from_millis(10),
            max_attempts_ceiling: 10,
        }
    }
}

impl AdaptiveSettings {
    /// Validate the settings
    pub fn validate(&self) -> CommonResult<()> {
        if self.window == 0 || self.window > self.history_capacity {
            return Err(CommonError::config_field(
                "window",
                "must be between 1 and history_capacity",
            ));
        }
        if self.adjust_every == 0 {
            return Err(CommonError::config_field("adjust_every", "must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.low_success_rate)
            || !(0.0..=1.0).contains(&self.high_success_rate)
            || self.low_success_rate > self.high_success_rate
        {
            return Err(CommonError::config_field(
                "low_success_rate",
                "rates must satisfy 0 <= low <= high <= 1",
            ));
        }
        if !(self.speedup_factor > 0.0 && self.speedup_factor <= 1.0) {
            return Err(CommonError::config_field("speedup_factor", "must be in (0, 1]"));
        }
        if !(self.slowdown_factor.is_finite() && self.slowdown_factor >= 1.0) {
            return Err(CommonError::config_field("slowdown_factor", "must be at least 1.0"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AdaptiveState {
    success_history: VecDeque<bool>,
    since_adjustment: u32,
}

/// A [`RetryManager`] that becomes more aggressive while calls succeed and
/// more patient while they fail
#[derive(Debug)]
pub struct AdaptiveRetryManager {
    inner: RetryManager,
    settings: AdaptiveSettings,
    state: Mutex<AdaptiveState>,
}

impl AdaptiveRetryManager {
    pub fn new(config: RetryConfig, settings: AdaptiveSettings) -> CommonResult<Self> {
        settings.validate()?;
        Ok(Self { inner: RetryManager::new(config)?, settings, state: Mutex::default() })
    }

    pub fn with_defaults() -> Self {
        Self {
            inner: RetryManager::with_defaults(),
            settings: AdaptiveSettings::default(),
            state: Mutex::default(),
        }
    }

    /// The underlying manager
    pub fn manager(&self) -> &RetryManager {
        &self.inner
    }

    pub fn settings(&self) -> &AdaptiveSettings {
        &self.settings
    }

    /// Snapshot of the current, possibly retuned, configuration
    pub fn config(&self) -> RetryConfig {
        self.inner.config()
    }

    pub fn stats(&self) -> RetryStats {
        self.inner.stats()
    }

    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.inner.calculate_delay(attempt)
    }

    /// Recorded outcomes, oldest first
    pub fn success_history(&self) -> Vec<bool> {
        self.state.lock().success_history.iter().copied().collect()
    }

    pub async fn execute_with_retry<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let result = self.inner.execute_with_retry(operation).await;
        self.observe(&result);
        result
    }

    pub fn execute_with_retry_blocking<F, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: std::error::Error + 'static,
    {
        let result = self.inner.execute_with_retry_blocking(operation);
        self.observe(&result);
        result
    }

    fn observe<T, E>(&self, result: &Result<T, RetryError<E>>)
    where
        E: std::error::Error + 'static,
    {
        match result {
            Ok(_) => self.record_outcome(true),
            Err(error) if error.is_exhausted() => self.record_outcome(false),
            // Permanent failures say nothing about backoff timing
            Err(_) => {}
        }
    }

    fn record_outcome(&self, success: bool) {
        let mut state = self.state.lock();
        state.success_history.push_back(success);
        while state.success_history.len() > self.settings.history_capacity {
            state.success_history.pop_front();
        }

        state.since_adjustment += 1;
        if state.since_adjustment < self.settings.adjust_every {
            return;
        }
        state.since_adjustment = 0;

        let recent: Vec<bool> =
            state.success_history.iter().rev().take(self.settings.window).copied().collect();
        let rate = recent.iter().filter(|ok| **ok).count() as f64 / recent.len() as f64;
        self.adjust(rate);
    }

    fn adjust(&self, success_rate: f64) {
        let settings = &self.settings;

        if success_rate > settings.high_success_rate {
            self.inner.update_config(|config| {
                let floor = settings.min_initial_delay.min(config.initial_delay);
                config.initial_delay = scale(config.initial_delay, settings.speedup_factor).max(floor);
                debug!(success_rate, initial_delay = ?config.initial_delay, "Shortened retry delay");
            });
        } else if success_rate < settings.low_success_rate {
            self.inner.update_config(|config| {
                config.initial_delay =
                    scale(config.initial_delay, settings.slowdown_factor).min(config.max_delay);
                if config.max_attempts < settings.max_attempts_ceiling {
                    config.max_attempts += 1;
                }
                info!(
                    success_rate,
                    initial_delay = ?config.initial_delay,
                    max_attempts = config.max_attempts,
                    "Backed off retry schedule"
                );
            });
        }
    }
}

/// Scale a duration by `factor`, rounded to the nearest nanosecond
fn scale(duration: Duration, factor: f64) -> Duration {
    let nanos = (duration.as_nanos() as f64 * factor).round();
    Duration::from_nanos(nanos.min(u64::MAX as f64) as u64)
}
