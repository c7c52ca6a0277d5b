//! Circuit breaker with consecutive-failure and windowed failure-rate
//! tripping.
//!
//! A breaker gates calls to one named resource. It starts CLOSED, opens when
//! failures pile up, rejects calls while OPEN, and after a cool-down lets a
//! single probe through in HALF_OPEN to decide whether to close again.
//!
//! The same breaker serves blocking ([`CircuitBreaker::call`]) and async
//! ([`CircuitBreaker::call_async`]) callers. Its critical section is a short
//! `parking_lot` mutex that is never held while the operation runs or across
//! an `.await`.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::stats::{BreakerStats, CircuitBreakerStatus};
use crate::error::{BoxedError, ConfigError, ConfigResult, ErrorClassification, FailureReason};

//==============================================================================
// Error Types
//==============================================================================

/// Error returned by a breaker-guarded call
///
/// The two rejection variants mean the operation was never attempted.
/// [`CircuitError::Operation`] carries the operation's own error untouched.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The breaker is open and still cooling down
    #[error("Circuit breaker '{name}' is open, retry after {retry_after:?}")]
    CircuitOpen {
        name: String,
        /// Remaining cool-down before the next probe is allowed
        retry_after: Duration,
    },

    /// The breaker is half-open and its single probe is already in flight
    #[error("Circuit breaker '{name}' is half-open with a probe in flight")]
    CircuitBusy { name: String },

    /// The operation ran and failed
    #[error(transparent)]
    Operation(E),
}

impl<E> CircuitError<E> {
    /// True when the breaker rejected the call without running it
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Operation(_))
    }

    /// True for [`CircuitError::CircuitOpen`]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// True for [`CircuitError::CircuitBusy`]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::CircuitBusy { .. })
    }

    /// Borrow the operation's error, if the operation ran
    pub fn operation(&self) -> Option<&E> {
        match self {
            Self::Operation(error) => Some(error),
            _ => None,
        }
    }

    /// Take the operation's error, if the operation ran
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            _ => None,
        }
    }
}

impl<E: ErrorClassification> ErrorClassification for CircuitError<E> {
    fn failure_reason(&self) -> FailureReason {
        match self {
            Self::CircuitOpen { .. } => FailureReason::CircuitOpen,
            Self::CircuitBusy { .. } => FailureReason::CircuitBusy,
            Self::Operation(error) => error.failure_reason(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            Self::CircuitBusy { .. } => None,
            Self::Operation(error) => error.retry_after(),
        }
    }
}

//==============================================================================
// State & Configuration
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing a single probe
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

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// Time spent open before a probe is allowed
    pub timeout: Duration,
    /// Windowed failure fraction that opens a closed circuit
    pub failure_rate_threshold: f64,
    /// Window samples required before the failure rate is considered
    pub minimum_requests: u32,
    /// Span of the sliding outcome window
    pub window_size: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            failure_rate_threshold: 0.5,
            minimum_requests: 10,
            window_size: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Create a configuration builder (alias for `new()`)
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }

        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(ConfigError::invalid(format!(
                "failure_rate_threshold must be in (0, 1], got {}",
                self.failure_rate_threshold
            )));
        }

        if self.minimum_requests == 0 {
            return Err(ConfigError::invalid("minimum_requests must be greater than 0"));
        }

        if self.window_size.is_zero() {
            return Err(ConfigError::invalid("window_size must be greater than 0"));
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.config.failure_rate_threshold = threshold;
        self
    }

    pub fn minimum_requests(mut self, requests: u32) -> Self {
        self.config.minimum_requests = requests;
        self
    }

    pub fn window_size(mut self, window: Duration) -> Self {
        self.config.window_size = window;
        self
    }

    /// Set a custom clock and build a breaker directly (useful for testing)
    pub fn clock<C: Clock>(self, clock: C) -> CircuitBreakerBuilderWithClock<C> {
        CircuitBreakerBuilderWithClock { builder: self, clock }
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder with custom clock that builds a CircuitBreaker directly
pub struct CircuitBreakerBuilderWithClock<C: Clock> {
    builder: CircuitBreakerConfigBuilder,
    clock: C,
}

impl<C: Clock> CircuitBreakerBuilderWithClock<C> {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.builder = self.builder.failure_threshold(threshold);
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.builder = self.builder.success_threshold(threshold);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.timeout(timeout);
        self
    }

    pub fn failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.builder = self.builder.failure_rate_threshold(threshold);
        self
    }

    pub fn minimum_requests(mut self, requests: u32) -> Self {
        self.builder = self.builder.minimum_requests(requests);
        self
    }

    pub fn window_size(mut self, window: Duration) -> Self {
        self.builder = self.builder.window_size(window);
        self
    }

    pub fn build(self, name: impl Into<String>) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(name, self.builder.build()?, self.clock)
    }
}

//==============================================================================
// Circuit Breaker
//==============================================================================

/// Callback invoked with `(old, new)` on every state transition
pub type StateChangeCallback =
    Arc<dyn Fn(CircuitState, CircuitState) -> Result<(), BoxedError> + Send + Sync>;

type Transition = Option<(CircuitState, CircuitState)>;

#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    stats: BreakerStats,
}

/// Permission to run one operation, held until its outcome is recorded
struct Ticket<'a> {
    admitted_in: CircuitState,
    _probe: Option<SemaphorePermit<'a>>,
}

/// Named circuit breaker guarding one logical resource
///
/// Share it through `Arc`; every method takes `&self`.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    core: Mutex<BreakerCore>,
    probe: Semaphore,
    callbacks: RwLock<Vec<StateChangeCallback>>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &core.state)
            .field("consecutive_failures", &core.stats.consecutive_failures)
            .field("callbacks", &self.callbacks.read().len())
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }

    /// Create a circuit breaker with the default configuration
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::from_valid_config(name.into(), CircuitBreakerConfig::default(), SystemClock)
    }

    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(name.into(), config, clock))
    }

    pub(crate) fn from_valid_config(name: String, config: CircuitBreakerConfig, clock: C) -> Self {
        let stats = BreakerStats::new(config.window_size, clock.now(), clock.system_time());
        Self {
            name,
            config,
            core: Mutex::new(BreakerCore { state: CircuitState::Closed, stats }),
            probe: Semaphore::new(1),
            callbacks: RwLock::new(Vec::new()),
            clock,
        }
    }

    /// Resource name this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration in effect
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute a blocking operation under breaker protection
    ///
    /// The operation runs outside the critical section, so it may itself
    /// call back into this breaker.
    #[instrument(skip(self, operation), fields(breaker = %self.name))]
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let ticket = self.admit::<E>()?;
        let result = operation();
        self.record(&ticket, result.is_ok());
        drop(ticket);
        result.map_err(CircuitError::Operation)
    }

    /// Execute an async operation under breaker protection
    ///
    /// If the returned future is dropped mid-flight the probe permit is
    /// released and no outcome is recorded.
    #[instrument(skip(self, operation), fields(breaker = %self.name))]
    pub async fn call_async<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ticket = self.admit::<E>()?;
        let result = operation().await;
        self.record(&ticket, result.is_ok());
        drop(ticket);
        result.map_err(CircuitError::Operation)
    }

    /// Register a state-change callback
    ///
    /// Callbacks run after the critical section is released. Errors and
    /// panics are logged and never affect the breaker.
    ///
    /// Each transition is delivered exactly once, on the thread that caused
    /// it. Transitions caused by different threads in quick succession may
    /// reach callbacks out of order, so a callback that needs the latest
    /// state should read [`CircuitBreaker::state`] instead of the reported one.
    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(CircuitState, CircuitState) -> Result<(), BoxedError> + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Current state, without applying the lazy OPEN to HALF_OPEN check
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    /// Snapshot of state and statistics
    pub fn get_status(&self) -> CircuitBreakerStatus {
        let core = self.core.lock();
        CircuitBreakerStatus::capture(&self.name, core.state, &core.stats, self.clock.now())
    }

    /// Restore CLOSED with zeroed statistics
    pub fn reset(&self) {
        let change = {
            let mut core = self.core.lock();
            let from = core.state;
            core.state = CircuitState::Closed;
            core.stats.reset(self.clock.now(), self.clock.system_time());
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
        };
        info!(breaker = %self.name, "Circuit breaker manually reset to closed state");
        self.notify(change);
    }

    fn admit<E>(&self) -> Result<Ticket<'_>, CircuitError<E>> {
        let (admission, change) = {
            let mut core = self.core.lock();
            let mut change = None;

            if core.state == CircuitState::Open {
                let elapsed =
                    self.clock.now().saturating_duration_since(core.stats.state_changed_at);
                if elapsed < self.config.timeout {
                    let retry_after = self.config.timeout - elapsed;
                    drop(core);
                    debug!(breaker = %self.name, ?retry_after, "Circuit open, rejecting call");
                    return Err(CircuitError::CircuitOpen { name: self.name.clone(), retry_after });
                }
                change = self.transition(&mut core, CircuitState::HalfOpen);
            }

            let admission = match core.state {
                CircuitState::HalfOpen => match self.probe.try_acquire() {
                    Ok(permit) => {
                        Ok(Ticket { admitted_in: CircuitState::HalfOpen, _probe: Some(permit) })
                    }
                    Err(_) => Err(CircuitError::CircuitBusy { name: self.name.clone() }),
                },
                state => Ok(Ticket { admitted_in: state, _probe: None }),
            };
            (admission, change)
        };

        if admission.is_err() {
            debug!(breaker = %self.name, "Probe in flight, rejecting call");
        }
        self.notify(change);
        admission
    }

    /// Record one outcome and apply at most one transition.
    ///
    /// Outcomes of calls admitted under a state the breaker has since left
    /// count toward totals and the window but leave both streaks alone. The
    /// only transition they can drive is a HALF_OPEN failure reopening the
    /// circuit.
    fn record(&self, ticket: &Ticket<'_>, success: bool) {
        let change = {
            let mut core = self.core.lock();
            let now = self.clock.now();
            let wall = self.clock.system_time();
            let current = core.state == ticket.admitted_in;

            match (current, success) {
                (true, true) => core.stats.record_success(now, wall),
                (true, false) => core.stats.record_failure(now, wall),
                (false, _) => core.stats.record_stale(success, now, wall),
            }

            let target = match (core.state, success) {
                (CircuitState::HalfOpen, false) => Some(CircuitState::Open),
                (CircuitState::HalfOpen, true)
                    if current
                        && core.stats.consecutive_successes >= self.config.success_threshold =>
                {
                    Some(CircuitState::Closed)
                }
                (CircuitState::Closed, false) if current && self.should_trip(&core.stats, now) => {
                    Some(CircuitState::Open)
                }
                _ => None,
            };

            target.and_then(|to| self.transition(&mut core, to))
        };
        self.notify(change);
    }

    fn should_trip(&self, stats: &BreakerStats, now: Instant) -> bool {
        if stats.consecutive_failures >= self.config.failure_threshold {
            return true;
        }
        let window = stats.window_counts(now);
        window.requests >= u64::from(self.config.minimum_requests)
            && window.failure_rate() >= self.config.failure_rate_threshold
    }

    fn transition(&self, core: &mut BreakerCore, to: CircuitState) -> Transition {
        let from = core.state;
        if from == to {
            return None;
        }
        core.state = to;
        core.stats.mark_transition(self.clock.now(), self.clock.system_time());
        info!(breaker = %self.name, %from, %to, "Circuit breaker state changed");
        Some((from, to))
    }

    fn notify(&self, change: Transition) {
        let Some((from, to)) = change else {
            return;
        };
        let callbacks = self.callbacks.read().clone();
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(from, to))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(breaker = %self.name, %from, %to, error = %err, "State change callback failed");
                }
                Err(_) => {
                    error!(breaker = %self.name, %from, %to, "State change callback panicked");
                }
            }
        }
    }
}
