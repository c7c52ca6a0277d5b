//! Resilience coordination for calls to unreliable dependencies.
//!
//! A circuit breaker with a time-windowed failure-rate model, a retry engine
//! with composable wait strategies, and a thin composition layer that gates
//! every retry attempt through a shared breaker.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: errors, failure classification, settings
//! - `observability`: tracing (pulled in by `runtime`)
//! - `runtime`: circuit breaker, retry engine, registry (default)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod config;
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use config::{CircuitBreakerSettings, ResilienceSettings, RetrySettings};
#[cfg(feature = "foundation")]
pub use error::{
    BoxedError, ConfigError, ConfigResult, DependencyError, ErrorClassification, FailureReason,
};
#[cfg(feature = "runtime")]
pub use resilience::{
    policies, BackoffStrategy, BreakerRegistry, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitBreakerStatus, CircuitError, CircuitState, Clock, Jitter,
    MockClock, ResilientExecutor, RetryCondition, RetryOutcome, RetryPolicy, RetryPolicyBuilder,
    RetryStep, SystemClock, WaitStrategy,
};
#[cfg(feature = "foundation")]
pub use utils::serde::{duration_millis, duration_secs};
