//! Registry of named circuit breakers

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::error::CommonResult;
use crate::testing::time::{Clock, SystemClock};

static GLOBAL_BREAKERS: Lazy<CircuitBreakerManager> = Lazy::new(CircuitBreakerManager::new);

/// Process-wide breaker registry
pub fn global_breakers() -> &'static CircuitBreakerManager {
    &GLOBAL_BREAKERS
}

/// Owns breakers by name so independent callers share one breaker per
/// dependency
///
/// Registration is idempotent: registering an existing name returns the
/// already-registered breaker and ignores the supplied configuration.
pub struct CircuitBreakerManager<C: Clock + Clone = SystemClock> {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker<C>>>>,
    default_config: CircuitBreakerConfig,
    clock: C,
}

impl CircuitBreakerManager<SystemClock> {
    /// Create an empty registry using the default breaker configuration
    pub fn new() -> Self {
        Self::with_clock(CircuitBreakerConfig::default(), SystemClock)
    }

    /// Create an empty registry whose breakers default to `config`
    pub fn with_default_config(config: CircuitBreakerConfig) -> CommonResult<Self> {
        config.validate()?;
        Ok(Self::with_clock(config, SystemClock))
    }
}

impl Default for CircuitBreakerManager<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> CircuitBreakerManager<C> {
    /// Create an empty registry whose breakers share `clock`
    pub fn with_clock(default_config: CircuitBreakerConfig, clock: C) -> Self {
        Self { breakers: RwLock::new(HashMap::new()), default_config, clock }
    }

    /// Get the breaker registered under `name`, creating it if absent
    ///
    /// `config` falls back to the registry default. An invalid configuration
    /// is only an error when a new breaker actually has to be built.
    pub fn register(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> CommonResult<Arc<CircuitBreaker<C>>> {
        if let Some(existing) = self.breakers.read().get(name) {
            return Ok(Arc::clone(existing));
        }

        let mut breakers = self.breakers.write();
        if let Some(existing) = breakers.get(name) {
            return Ok(Arc::clone(existing));
        }

        let config = config.unwrap_or_else(|| self.default_config.clone());
        let breaker = Arc::new(CircuitBreaker::with_clock(name, config, self.clock.clone())?);
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        info!(breaker = %name, "Registered circuit breaker");

        Ok(breaker)
    }

    /// Look up a registered breaker
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.read().get(name).cloned()
    }

    /// Remove a breaker from the registry
    ///
    /// Callers still holding the `Arc` keep a working breaker; later
    /// registrations under the same name start fresh.
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        let removed = self.breakers.write().remove(name);
        if removed.is_some() {
            debug!(breaker = %name, "Removed circuit breaker");
        }
        removed
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Statistics of every registered breaker keyed by name
    pub fn get_all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.breakers.read().iter().map(|(name, breaker)| (name.clone(), breaker.stats())).collect()
    }

    /// Reset every registered breaker
    pub fn reset_all(&self) {
        let breakers = self.breakers.read();
        for breaker in breakers.values() {
            breaker.reset();
        }
        info!(count = breakers.len(), "Reset all circuit breakers");
    }
}
