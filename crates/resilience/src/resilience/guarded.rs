//! Retry composed with a circuit breaker
//!
//! Retry is the outer loop and the breaker gates every single attempt, so a
//! breaker that opens mid-sequence stops the remaining attempts with
//! [`CircuitError::CircuitOpen`] instead of hammering the dependency.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::circuit_breaker::{CircuitBreaker, CircuitError};
use super::clock::{Clock, SystemClock};
use super::retry::{RetryOutcome, RetryPolicy};
use crate::error::ErrorClassification;

/// A shared breaker paired with a retry policy
pub struct ResilientExecutor<C: Clock = SystemClock> {
    breaker: Arc<CircuitBreaker<C>>,
    policy: RetryPolicy,
}

impl<C: Clock> Clone for ResilientExecutor<C> {
    fn clone(&self) -> Self {
        Self { breaker: Arc::clone(&self.breaker), policy: self.policy.clone() }
    }
}

impl<C: Clock> fmt::Debug for ResilientExecutor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("breaker", &self.breaker.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl<C: Clock> ResilientExecutor<C> {
    pub fn new(breaker: Arc<CircuitBreaker<C>>, policy: RetryPolicy) -> Self {
        Self { breaker, policy }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker<C>> {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run a blocking operation with retry, each attempt gated by the breaker
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: ErrorClassification + fmt::Display,
    {
        self.call_with_outcome(operation).into_result()
    }

    /// Blocking variant reporting attempts and total delay
    pub fn call_with_outcome<F, T, E>(&self, mut operation: F) -> RetryOutcome<T, CircuitError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: ErrorClassification + fmt::Display,
    {
        self.policy.execute_sync_with_outcome(|| self.breaker.call(&mut operation))
    }

    /// Run an async operation with retry, each attempt gated by the breaker
    pub async fn call_async<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + fmt::Display,
    {
        self.call_async_with_outcome(operation).await.into_result()
    }

    /// Async variant reporting attempts and total delay
    pub async fn call_async_with_outcome<F, Fut, T, E>(
        &self,
        mut operation: F,
    ) -> RetryOutcome<T, CircuitError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + fmt::Display,
    {
        let breaker: &CircuitBreaker<C> = &self.breaker;
        self.policy
            .execute_async_with_outcome(move || {
                let attempt = operation();
                breaker.call_async(move || attempt)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::{DependencyError, FailureReason};
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;
    use crate::resilience::clock::MockClock;

    fn executor(threshold: u32, attempts: u32) -> ResilientExecutor<MockClock> {
        let breaker = CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .timeout(Duration::from_secs(60))
            .clock(MockClock::new())
            .build("payments")
            .expect("valid config");
        let policy = RetryPolicy::builder()
            .max_attempts(attempts)
            .no_backoff()
            .retry_on([FailureReason::Connection])
            .build()
            .expect("valid policy");
        ResilientExecutor::new(Arc::new(breaker), policy)
    }

    /// Validates that every attempt passes through the breaker.
    ///
    /// Assertions:
    /// - The breaker records one request per attempt.
    /// - The operation error surfaces as `CircuitError::Operation`.
    #[test]
    fn test_each_attempt_is_gated() {
        let exec = executor(10, 3);
        let calls = AtomicU32::new(0);

        let err = exec
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(DependencyError::connection("payments", "refused"))
            })
            .expect_err("always fails");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(exec.breaker().get_status().total_requests, 3);
        assert!(err.operation().is_some());
    }

    /// Validates that an opening breaker cuts the retry sequence short.
    ///
    /// Assertions:
    /// - The breaker opens after two failures.
    /// - The third attempt is rejected and not retried.
    #[test]
    fn test_open_breaker_stops_retries() {
        let exec = executor(2, 5);
        let calls = AtomicU32::new(0);

        let outcome = exec.call_with_outcome(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DependencyError::connection("payments", "refused"))
        });

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.attempts, 3);
        let err = outcome.result.expect_err("open breaker");
        assert!(err.is_open());
        assert_eq!(err.failure_reason(), FailureReason::CircuitOpen);
    }

    #[tokio::test]
    async fn test_call_async_recovers() {
        let exec = executor(5, 3);
        let calls = AtomicU32::new(0);

        let value = exec
            .call_async(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(DependencyError::connection("payments", "reset"))
                    } else {
                        Ok("settled")
                    }
                }
            })
            .await
            .expect("third attempt succeeds");

        assert_eq!(value, "settled");
        let status = exec.breaker().get_status();
        assert_eq!(status.total_failures, 2);
        assert_eq!(status.total_successes, 1);
    }
}
