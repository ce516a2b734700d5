//! Configuration for the resilience and correlation components
//!
//! [`WardenConfig`] is the serde view of a `warden.toml`/`warden.json` file.
//! Every field has a default, so partial files are valid. The settings
//! structs convert into the validated runtime configs consumed by the
//! components.

pub mod loader;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use loader::{apply_env_overrides, find_config_file, load, load_from_file};

use crate::correlation::TrackerConfig;
use crate::error::{CommonError, CommonResult};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub tracker: TrackerSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub retry: RetrySettings,
    pub logging: LoggingConfig,
}

/// `[tracker]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Finished correlations kept in memory
    pub max_history_size: usize,
    /// Age after which an active correlation is timed out
    pub correlation_ttl_seconds: u64,
    /// Period of the background TTL sweep
    pub cleanup_interval_seconds: u64,
    /// Directory for `<id>.json` snapshots; unset disables persistence
    pub persistence_dir: Option<PathBuf>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            max_history_size: 1000,
            correlation_ttl_seconds: 3600,
            cleanup_interval_seconds: 300,
            persistence_dir: None,
        }
    }
}

impl TryFrom<&TrackerSettings> for TrackerConfig {
    type Error = CommonError;

    fn try_from(settings: &TrackerSettings) -> CommonResult<Self> {
        let config = TrackerConfig {
            max_history_size: settings.max_history_size,
            correlation_ttl: Duration::from_secs(settings.correlation_ttl_seconds),
            cleanup_interval: Duration::from_secs(settings.cleanup_interval_seconds),
            persistence_dir: settings.persistence_dir.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// `[circuit_breaker]` section, the default for registered breakers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u64,
    /// Seconds an open circuit waits before admitting trials
    pub recovery_timeout_seconds: f64,
    /// Trial successes that close the circuit
    pub success_threshold: u64,
    /// Concurrent trial calls while half-open
    pub half_open_max_calls: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 60.0,
            success_threshold: 2,
            half_open_max_calls: 3,
        }
    }
}

impl TryFrom<&CircuitBreakerSettings> for CircuitBreakerConfig {
    type Error = CommonError;

    fn try_from(settings: &CircuitBreakerSettings) -> CommonResult<Self> {
        CircuitBreakerConfig::builder()
            .failure_threshold(settings.failure_threshold)
            .recovery_timeout(seconds("recovery_timeout_seconds", settings.recovery_timeout_seconds)?)
            .success_threshold(settings.success_threshold)
            .half_open_max_calls(settings.half_open_max_calls)
            .build()
    }
}

/// `[retry]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay_seconds: f64,
    /// Cap on the un-jittered delay
    pub max_delay_seconds: f64,
    pub exponential_base: f64,
    pub jitter: bool,
    /// Relative jitter band, in `[0, 1]`
    pub jitter_range: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_seconds: 1.0,
            max_delay_seconds: 60.0,
            exponential_base: 2.0,
            jitter: true,
            jitter_range: 0.1,
        }
    }
}

impl TryFrom<&RetrySettings> for RetryConfig {
    type Error = CommonError;

    fn try_from(settings: &RetrySettings) -> CommonResult<Self> {
        let config = RetryConfig {
            max_attempts: settings.max_attempts,
            initial_delay: seconds("initial_delay_seconds", settings.initial_delay_seconds)?,
            max_delay: seconds("max_delay_seconds", settings.max_delay_seconds)?,
            exponential_base: settings.exponential_base,
            jitter: settings.jitter,
            jitter_range: settings.jitter_range,
            ..RetryConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

fn seconds(field: &str, value: f64) -> CommonResult<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| CommonError::config_field(field, "must be a finite, non-negative number of seconds"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_runtime_defaults() {
        let config = WardenConfig::default();

        let tracker = TrackerConfig::try_from(&config.tracker).unwrap();
        assert_eq!(tracker, TrackerConfig::default());

        let breaker = CircuitBreakerConfig::try_from(&config.circuit_breaker).unwrap();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.recovery_timeout, Duration::from_secs(60));

        let retry = RetryConfig::try_from(&config.retry).unwrap();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = RetrySettings { initial_delay_seconds: -1.0, ..Default::default() };
        let err = RetryConfig::try_from(&settings).unwrap_err();
        assert!(matches!(err, CommonError::Config { field: Some(ref f), .. } if f == "initial_delay_seconds"));

        let settings = CircuitBreakerSettings { failure_threshold: 0, ..Default::default() };
        assert!(CircuitBreakerConfig::try_from(&settings).is_err());

        let settings = TrackerSettings { max_history_size: 0, ..Default::default() };
        assert!(TrackerConfig::try_from(&settings).is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: WardenConfig = toml::from_str("[retry]\nmax_attempts = 7\n").unwrap();
        assert_eq!(config.retry.max_attempts, 7);
        assert!((config.retry.exponential_base - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.tracker, TrackerSettings::default());
    }
}
