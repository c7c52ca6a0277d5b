//! Name-keyed registry of shared circuit breakers
//!
//! Call sites that guard the same resource ask the registry for the breaker
//! by name and so share one state machine and one set of statistics. The
//! registry is an ordinary value: construct it once and pass it (or an
//! `Arc` of it) to whoever needs it.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::clock::{Clock, SystemClock};
use super::guarded::ResilientExecutor;
use super::retry::RetryPolicy;
use super::stats::CircuitBreakerStatus;
use crate::error::ConfigResult;

/// Lookup-or-create map from resource name to breaker
pub struct BreakerRegistry<C: Clock + Clone = SystemClock> {
    breakers: DashMap<String, Arc<CircuitBreaker<C>>>,
    default_config: CircuitBreakerConfig,
    clock: C,
}

impl<C: Clock + Clone> fmt::Debug for BreakerRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.names())
            .field("default_config", &self.default_config)
            .finish()
    }
}

impl BreakerRegistry<SystemClock> {
    /// Registry handing out breakers with the default configuration
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
            default_config: CircuitBreakerConfig::default(),
            clock: SystemClock,
        }
    }

    /// Registry handing out breakers with `default_config`
    pub fn with_config(default_config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(default_config, SystemClock)
    }
}

impl Default for BreakerRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> BreakerRegistry<C> {
    /// Registry whose breakers all read `clock` (useful for testing)
    pub fn with_clock(default_config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        default_config.validate()?;
        Ok(Self { breakers: DashMap::new(), default_config, clock })
    }

    /// Configuration applied by [`BreakerRegistry::get_or_create`]
    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Shared breaker for `name`, created with the default configuration on
    /// first use
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker<C>> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        self.insert_if_absent(name, self.default_config.clone())
    }

    /// Shared breaker for `name`, created with `config` on first use
    ///
    /// The configuration is validated even when the breaker already exists;
    /// an existing breaker keeps the configuration it was created with.
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<Arc<CircuitBreaker<C>>> {
        config.validate()?;
        Ok(self.insert_if_absent(name, config))
    }

    fn insert_if_absent(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker<C>> {
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            debug!(breaker = name, "Creating circuit breaker");
            Arc::new(CircuitBreaker::from_valid_config(name.to_string(), config, self.clock.clone()))
        });
        Arc::clone(entry.value())
    }

    /// Existing breaker for `name`
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the registry's handle; holders of the `Arc` keep working
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.remove(name).map(|(_, breaker)| breaker)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Status of every breaker, sorted by name
    pub fn statuses(&self) -> Vec<CircuitBreakerStatus> {
        let breakers: Vec<Arc<CircuitBreaker<C>>> =
            self.breakers.iter().map(|e| Arc::clone(e.value())).collect();
        let mut statuses: Vec<CircuitBreakerStatus> =
            breakers.iter().map(|breaker| breaker.get_status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Reset every registered breaker
    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker<C>>> =
            self.breakers.iter().map(|e| Arc::clone(e.value())).collect();
        for breaker in &breakers {
            breaker.reset();
        }
        info!(count = breakers.len(), "Reset all circuit breakers");
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Executor combining the shared breaker for `name` with `policy`
    pub fn executor(&self, name: &str, policy: RetryPolicy) -> ResilientExecutor<C> {
        ResilientExecutor::new(self.get_or_create(name), policy)
    }
}
