//! Resilience patterns for calls to unreliable dependencies
//!
//! This module provides:
//! - **Circuit Breaker**: stops calling a failing resource, then probes it
//!   with a single trial call after a cool-down
//! - **Retry Logic**: attempt-bounded retry with exponential backoff, jitter,
//!   and server "retry after" hints
//! - **Composition**: [`ResilientExecutor`] runs retry as the outer loop and
//!   gates every attempt through a shared breaker from a [`BreakerRegistry`]
//!
//! ## Example
//!
//! ```rust
//! use bulwark_resilience::{policies, BreakerRegistry, DependencyError};
//!
//! let registry = BreakerRegistry::new();
//! let executor = registry.executor("inventory", policies::no_retry());
//!
//! let stock = executor.call(|| Ok::<_, DependencyError>(42));
//! assert_eq!(stock.ok(), Some(42));
//! assert_eq!(registry.get_or_create("inventory").get_status().total_requests, 1);
//! ```
//!
//! ## Choosing a Clock
//!
//! Breakers and registries are generic over [`Clock`]. Production code uses
//! the default [`SystemClock`]; tests inject a [`MockClock`] and advance it
//! to cross cool-downs and window boundaries without sleeping.

pub mod circuit_breaker;
pub mod clock;
pub mod guarded;
pub mod policies;
pub mod registry;
pub mod retry;
pub mod stats;
pub mod window;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilderWithClock, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitError, CircuitState, StateChangeCallback,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use guarded::ResilientExecutor;
pub use registry::BreakerRegistry;
pub use retry::{
    BackoffStrategy, Jitter, ReasonPredicate, RetryCondition, RetryOutcome, RetryPolicy,
    RetryPolicyBuilder, RetryStep, WaitStrategy,
};
pub use stats::{BreakerStats, CircuitBreakerStatus};
pub use window::{OutcomeWindow, WindowCounts};
