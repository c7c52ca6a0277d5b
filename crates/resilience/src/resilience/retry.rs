//! Attempt-bounded retry with composable wait strategies
//!
//! A [`RetryPolicy`] combines three independent pieces:
//! - an attempt budget (`max_attempts`, counting the first call),
//! - a [`WaitStrategy`] turning the attempt number and an optional server
//!   "retry after" hint into a delay,
//! - a [`RetryCondition`] deciding from the failure's [`FailureReason`]
//!   whether another attempt is worthwhile.
//!
//! Blocking and async execution share [`RetryPolicy::next_step`], so the two
//! entry points only differ in how they sleep. Exhausting the budget is not
//! a distinct error: the last error is returned unchanged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::error::{ConfigError, ConfigResult, ErrorClassification, FailureReason};

//==============================================================================
// Wait Strategies
//==============================================================================

/// Base delay curve, indexed by the 1-based number of the failed attempt
#[derive(Debug, Clone, Copy)]
pub enum BackoffStrategy {
    /// Retry immediately
    None,
    /// Same delay before every retry
    Fixed(Duration),
    /// `min * 2^(attempt - 1)`, clamped to `[min, max]`
    Exponential { min: Duration, max: Duration },
    /// Caller-supplied curve
    Custom(fn(u32) -> Duration),
}

impl BackoffStrategy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential { min, max } => {
                let exponent = attempt.saturating_sub(1).min(31);
                let scaled = min.saturating_mul(1u32 << exponent);
                scaled.min(*max).max(*min)
            }
            BackoffStrategy::Custom(f) => f(attempt),
        }
    }
}

/// Random offset added on top of the backoff delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// No jitter
    None,
    /// Uniform offset in `[0, bound]`
    Uniform(Duration),
}

impl Jitter {
    /// Apply jitter to the calculated delay
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Uniform(bound) if bound.is_zero() => delay,
            Jitter::Uniform(bound) => {
                let offset = rand::thread_rng().gen_range(0.0..=bound.as_secs_f64());
                delay.saturating_add(Duration::try_from_secs_f64(offset).unwrap_or(*bound))
            }
        }
    }
}

/// Backoff plus jitter plus optional respect for server hints
#[derive(Debug, Clone, Copy)]
pub struct WaitStrategy {
    pub backoff: BackoffStrategy,
    pub jitter: Jitter,
    /// Use the failure's "retry after" hint verbatim when present
    pub respect_retry_after: bool,
}

impl Default for WaitStrategy {
    fn default() -> Self {
        Self::none()
    }
}

impl WaitStrategy {
    /// Retry immediately
    pub fn none() -> Self {
        Self { backoff: BackoffStrategy::None, jitter: Jitter::None, respect_retry_after: false }
    }

    /// Constant delay
    pub fn fixed(delay: Duration) -> Self {
        Self { backoff: BackoffStrategy::Fixed(delay), ..Self::none() }
    }

    /// Doubling delay between `min` and `max`
    pub fn exponential(min: Duration, max: Duration) -> Self {
        Self { backoff: BackoffStrategy::Exponential { min, max }, ..Self::none() }
    }

    /// Add a uniform random offset in `[0, bound]`
    pub fn with_jitter(mut self, bound: Duration) -> Self {
        self.jitter = Jitter::Uniform(bound);
        self
    }

    /// Prefer server-supplied "retry after" hints over the backoff curve
    pub fn respecting_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    /// Delay before the attempt following `attempt`
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) if self.respect_retry_after => hint,
            _ => self.jitter.apply(self.backoff.delay_for(attempt)),
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if let BackoffStrategy::Exponential { min, max } = self.backoff {
            if min > max {
                return Err(ConfigError::invalid(format!(
                    "min_wait ({min:?}) must not exceed max_wait ({max:?})"
                )));
            }
        }
        Ok(())
    }
}

//==============================================================================
// Retry Conditions
//==============================================================================

/// Predicate over failure reasons
pub type ReasonPredicate = Arc<dyn Fn(FailureReason) -> bool + Send + Sync>;

/// Decides whether a classified failure is worth another attempt
///
/// [`FailureReason::Fatal`] is never retried by a reason set, and the two
/// breaker rejections only when listed explicitly (see
/// [`RetryCondition::with_busy_retry`]). A custom predicate decides alone.
pub enum RetryCondition {
    /// Never retry
    Never,
    /// Retry the listed reasons
    OnReasons(Vec<FailureReason>),
    /// Retry when the predicate returns true
    Custom(ReasonPredicate),
}

impl Clone for RetryCondition {
    fn clone(&self) -> Self {
        match self {
            Self::Never => Self::Never,
            Self::OnReasons(reasons) => Self::OnReasons(reasons.clone()),
            Self::Custom(f) => Self::Custom(Arc::clone(f)),
        }
    }
}

impl fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "Never"),
            Self::OnReasons(reasons) => f.debug_tuple("OnReasons").field(reasons).finish(),
            Self::Custom(_) => write!(f, "Custom(<predicate>)"),
        }
    }
}

impl Default for RetryCondition {
    fn default() -> Self {
        Self::transient()
    }
}

impl RetryCondition {
    /// Retry exactly the given reasons
    pub fn on<I>(reasons: I) -> Self
    where
        I: IntoIterator<Item = FailureReason>,
    {
        let mut list: Vec<FailureReason> = Vec::new();
        for reason in reasons {
            if !list.contains(&reason) {
                list.push(reason);
            }
        }
        Self::OnReasons(list)
    }

    /// Retry every transient dependency failure
    pub fn transient() -> Self {
        Self::on([
            FailureReason::Connection,
            FailureReason::Timeout,
            FailureReason::RateLimited,
            FailureReason::ServerError,
            FailureReason::Deadlock,
        ])
    }

    /// Retry when `predicate` returns true
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(FailureReason) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Also retry calls a half-open breaker turned away as busy
    pub fn with_busy_retry(self) -> Self {
        match self {
            Self::Never => Self::OnReasons(vec![FailureReason::CircuitBusy]),
            Self::OnReasons(reasons) => {
                Self::on(reasons.into_iter().chain([FailureReason::CircuitBusy]))
            }
            Self::Custom(f) => {
                Self::custom(move |reason| reason == FailureReason::CircuitBusy || f(reason))
            }
        }
    }

    /// Whether a failure with this reason should be retried
    pub fn should_retry(&self, reason: FailureReason) -> bool {
        match self {
            Self::Never => false,
            Self::OnReasons(reasons) => !reason.is_fatal() && reasons.contains(&reason),
            Self::Custom(f) => f(reason),
        }
    }
}

//==============================================================================
// Retry Policy
//==============================================================================

/// Outcome of one retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Sleep for the delay, then try again
    Retry(Duration),
    /// The attempt budget is spent
    Exhausted,
    /// The condition rejected the failure reason
    NotRetryable,
}

/// Result of a retried execution plus summary statistics
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Final result, identical to what `execute_*` returns
    pub result: Result<T, E>,
    /// Number of times the operation was invoked
    pub attempts: u32,
    /// Sum of all inter-attempt delays
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    /// Discard the statistics
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }

    /// Whether at least one retry happened
    pub fn retried(&self) -> bool {
        self.attempts > 1
    }
}

/// Immutable retry policy, cheap to clone and share
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub(crate) max_attempts: u32,
    pub(crate) wait: WaitStrategy,
    pub(crate) condition: RetryCondition,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait: WaitStrategy::exponential(Duration::from_secs(1), Duration::from_secs(10)),
            condition: RetryCondition::transient(),
        }
    }
}

impl RetryPolicy {
    /// Create a validated policy
    pub fn new(
        max_attempts: u32,
        wait: WaitStrategy,
        condition: RetryCondition,
    ) -> ConfigResult<Self> {
        if max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be greater than 0"));
        }
        wait.validate()?;
        Ok(Self { max_attempts, wait, condition })
    }

    /// Create a policy builder
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn wait(&self) -> &WaitStrategy {
        &self.wait
    }

    pub fn condition(&self) -> &RetryCondition {
        &self.condition
    }

    /// Decide what happens after `attempt` (1-based) failed
    pub fn next_step(
        &self,
        attempt: u32,
        reason: FailureReason,
        retry_after: Option<Duration>,
    ) -> RetryStep {
        if !self.condition.should_retry(reason) {
            RetryStep::NotRetryable
        } else if attempt >= self.max_attempts {
            RetryStep::Exhausted
        } else {
            RetryStep::Retry(self.wait.delay_for(attempt, retry_after))
        }
    }

    /// Execute a blocking operation, sleeping the thread between attempts
    pub fn execute_sync<F, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: ErrorClassification + fmt::Display,
    {
        self.execute_sync_with_outcome(operation).into_result()
    }

    /// Blocking execution that also reports attempts and total delay
    #[instrument(skip(self, operation), fields(max_attempts = self.max_attempts))]
    pub fn execute_sync_with_outcome<F, T, E>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: ErrorClassification + fmt::Display,
    {
        let mut attempt = 1;
        let mut total_delay = Duration::ZERO;

        loop {
            match operation() {
                Ok(value) => return self.succeeded(value, attempt, total_delay),
                Err(error) => match self.delay_after_failure(attempt, &error) {
                    Some(delay) => {
                        std::thread::sleep(delay);
                        total_delay += delay;
                        attempt += 1;
                    }
                    None => {
                        return RetryOutcome { result: Err(error), attempts: attempt, total_delay }
                    }
                },
            }
        }
    }

    /// Execute an async operation, sleeping with `tokio::time::sleep`
    pub async fn execute_async<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + fmt::Display,
    {
        self.execute_async_with_outcome(operation).await.into_result()
    }

    /// Async execution that also reports attempts and total delay
    #[instrument(skip(self, operation), fields(max_attempts = self.max_attempts))]
    pub async fn execute_async_with_outcome<F, Fut, T, E>(
        &self,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + fmt::Display,
    {
        let mut attempt = 1;
        let mut total_delay = Duration::ZERO;

        loop {
            match operation().await {
                Ok(value) => return self.succeeded(value, attempt, total_delay),
                Err(error) => match self.delay_after_failure(attempt, &error) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        total_delay += delay;
                        attempt += 1;
                    }
                    None => {
                        return RetryOutcome { result: Err(error), attempts: attempt, total_delay }
                    }
                },
            }
        }
    }

    fn succeeded<T, E>(&self, value: T, attempts: u32, total_delay: Duration) -> RetryOutcome<T, E> {
        if attempts > 1 {
            debug!(
                attempts,
                total_delay_ms = total_delay.as_millis() as u64,
                "Operation succeeded after retry"
            );
        }
        RetryOutcome { result: Ok(value), attempts, total_delay }
    }

    /// Classify a failure, log the decision, and return the delay if another
    /// attempt should follow.
    fn delay_after_failure<E>(&self, attempt: u32, error: &E) -> Option<Duration>
    where
        E: ErrorClassification + fmt::Display,
    {
        let reason = error.failure_reason();
        match self.next_step(attempt, reason, error.retry_after()) {
            RetryStep::Retry(delay) => {
                warn!(
                    attempt,
                    max_attempts = self.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    error = %error,
                    "Operation failed, retrying"
                );
                Some(delay)
            }
            RetryStep::Exhausted => {
                warn!(attempts = attempt, %reason, error = %error, "Retry attempts exhausted");
                None
            }
            RetryStep::NotRetryable => {
                debug!(attempt, %reason, error = %error, "Failure is not retryable");
                None
            }
        }
    }
}

/// Builder for RetryPolicy with fluent API
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    /// Replace the whole wait strategy
    pub fn wait(mut self, wait: WaitStrategy) -> Self {
        self.policy.wait = wait;
        self
    }

    pub fn no_backoff(mut self) -> Self {
        self.policy.wait.backoff = BackoffStrategy::None;
        self
    }

    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.policy.wait.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    pub fn exponential_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.policy.wait.backoff = BackoffStrategy::Exponential { min, max };
        self
    }

    pub fn custom_backoff(mut self, curve: fn(u32) -> Duration) -> Self {
        self.policy.wait.backoff = BackoffStrategy::Custom(curve);
        self
    }

    pub fn jitter(mut self, bound: Duration) -> Self {
        self.policy.wait.jitter = Jitter::Uniform(bound);
        self
    }

    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.policy.wait.respect_retry_after = respect;
        self
    }

    pub fn condition(mut self, condition: RetryCondition) -> Self {
        self.policy.condition = condition;
        self
    }

    pub fn retry_on<I>(self, reasons: I) -> Self
    where
        I: IntoIterator<Item = FailureReason>,
    {
        self.condition(RetryCondition::on(reasons))
    }

    pub fn retry_if<F>(self, predicate: F) -> Self
    where
        F: Fn(FailureReason) -> bool + Send + Sync + 'static,
    {
        self.condition(RetryCondition::custom(predicate))
    }

    pub fn retry_busy(mut self) -> Self {
        self.policy.condition = self.policy.condition.with_busy_retry();
        self
    }

    pub fn build(self) -> ConfigResult<RetryPolicy> {
        let RetryPolicy { max_attempts, wait, condition } = self.policy;
        RetryPolicy::new(max_attempts, wait, condition)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the retry engine
    //!
    //! Tests cover backoff curves, jitter bounds, retry-after handling,
    //! condition semantics, the shared decision function, and both execution
    //! modes.

    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::DependencyError;

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .no_backoff()
            .retry_on([FailureReason::Connection, FailureReason::Timeout])
            .build()
            .expect("valid policy")
    }

    // =========================================================================
    // Wait Strategy Tests
    // =========================================================================

    /// Validates `BackoffStrategy::Exponential` for attempts 1 through 6.
    ///
    /// Assertions:
    /// - Each delay lies in `[min * 2^(n-1), max]`.
    /// - Delays clamp at `max`.
    #[test]
    fn test_exponential_backoff_bounds() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        let backoff = BackoffStrategy::Exponential { min, max };

        for attempt in 1..=4u32 {
            let delay = backoff.delay_for(attempt);
            let floor = (min * 2u32.pow(attempt - 1)).min(max);
            assert!(delay >= floor && delay <= max, "attempt {attempt}: {delay:?}");
        }
        assert_eq!(backoff.delay_for(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(8));
        assert_eq!(backoff.delay_for(5), max);
        assert_eq!(backoff.delay_for(u32::MAX), max);
    }

    #[test]
    fn test_fixed_none_and_custom_backoff() {
        assert_eq!(BackoffStrategy::None.delay_for(3), Duration::ZERO);
        assert_eq!(
            BackoffStrategy::Fixed(Duration::from_millis(500)).delay_for(9),
            Duration::from_millis(500)
        );

        fn linear(attempt: u32) -> Duration {
            Duration::from_millis(u64::from(attempt) * 100)
        }
        assert_eq!(BackoffStrategy::Custom(linear).delay_for(3), Duration::from_millis(300));
    }

    /// Validates `Jitter::Uniform` stays inside its bound.
    ///
    /// Assertions:
    /// - Every jittered delay lies in `[base, base + bound]`.
    #[test]
    fn test_uniform_jitter_bounds() {
        let base = Duration::from_millis(200);
        let bound = Duration::from_millis(50);
        for _ in 0..200 {
            let delay = Jitter::Uniform(bound).apply(base);
            assert!(delay >= base && delay <= base + bound, "{delay:?}");
        }
        assert_eq!(Jitter::None.apply(base), base);
    }

    #[test]
    fn test_uniform_jitter_saturates_near_max() {
        let delay = Jitter::Uniform(Duration::MAX).apply(Duration::from_secs(1));
        assert!(delay >= Duration::from_secs(1));

        let policy = RetryPolicy::builder()
            .fixed_backoff(Duration::MAX)
            .jitter(Duration::MAX)
            .build()
            .expect("valid policy");
        assert_eq!(policy.wait().delay_for(1, None), Duration::MAX);
    }

    #[test]
    fn test_retry_after_hint() {
        let wait = WaitStrategy::exponential(Duration::from_secs(2), Duration::from_secs(60));
        assert_eq!(wait.delay_for(1, Some(Duration::from_secs(30))), Duration::from_secs(2));

        let wait = wait.respecting_retry_after(true);
        assert_eq!(wait.delay_for(1, Some(Duration::from_secs(30))), Duration::from_secs(30));
        assert_eq!(wait.delay_for(2, None), Duration::from_secs(4));
    }

    // =========================================================================
    // Condition Tests
    // =========================================================================

    /// Validates `RetryCondition` rejection and fatal handling.
    ///
    /// Assertions:
    /// - Breaker rejections are not retried by default.
    /// - `with_busy_retry` opts into `CircuitBusy` only.
    /// - `Fatal` is never retried by a reason set.
    #[test]
    fn test_condition_semantics() {
        let transient = RetryCondition::transient();
        assert!(transient.should_retry(FailureReason::Deadlock));
        assert!(!transient.should_retry(FailureReason::CircuitOpen));
        assert!(!transient.should_retry(FailureReason::CircuitBusy));
        assert!(!transient.should_retry(FailureReason::Fatal));

        let busy = transient.with_busy_retry();
        assert!(busy.should_retry(FailureReason::CircuitBusy));
        assert!(!busy.should_retry(FailureReason::CircuitOpen));

        assert!(!RetryCondition::on([FailureReason::Fatal]).should_retry(FailureReason::Fatal));
        assert!(RetryCondition::Never.with_busy_retry().should_retry(FailureReason::CircuitBusy));

        let custom = RetryCondition::custom(|reason| reason == FailureReason::CircuitOpen);
        assert!(custom.should_retry(FailureReason::CircuitOpen));
        assert!(!custom.should_retry(FailureReason::Timeout));
        assert!(format!("{custom:?}").contains("Custom"));
    }

    #[test]
    fn test_next_step() {
        let policy = quick(3);
        assert_eq!(policy.next_step(1, FailureReason::Timeout, None), RetryStep::Retry(Duration::ZERO));
        assert_eq!(policy.next_step(3, FailureReason::Timeout, None), RetryStep::Exhausted);
        assert_eq!(policy.next_step(1, FailureReason::Fatal, None), RetryStep::NotRetryable);
    }

    #[test]
    fn test_builder_validation() {
        assert!(RetryPolicy::builder().max_attempts(0).build().is_err());
        assert!(RetryPolicy::builder()
            .exponential_backoff(Duration::from_secs(5), Duration::from_secs(1))
            .build()
            .is_err());
    }

    // =========================================================================
    // Execution Tests
    // =========================================================================

    /// Validates exhaustion against an always-failing operation.
    ///
    /// Assertions:
    /// - The operation runs exactly `max_attempts` times.
    /// - The original error is returned unchanged.
    #[test]
    fn test_execute_sync_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let outcome = quick(3).execute_sync_with_outcome(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DependencyError::timeout("lookup", Duration::from_secs(1)))
        });

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.retried());
        match outcome.result {
            Err(DependencyError::Timeout { operation, .. }) => assert_eq!(operation, "lookup"),
            other => panic!("expected original timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_non_retryable_runs_once() {
        let calls = AtomicU32::new(0);
        let result = quick(5).execute_sync(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DependencyError::internal("bad input"))
        });

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_execute_sync_fixed_delay_accumulates() {
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .fixed_backoff(Duration::from_millis(5))
            .retry_on([FailureReason::Connection])
            .build()
            .expect("valid policy");

        let calls = AtomicU32::new(0);
        let outcome = policy.execute_sync_with_outcome(|| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DependencyError::connection("cache", "reset by peer"))
            } else {
                Ok("warm")
            }
        });

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.total_delay, Duration::from_millis(10));
        assert_eq!(outcome.into_result().expect("third attempt succeeds"), "warm");
    }

    /// Validates async execution through `tokio_test::block_on`.
    ///
    /// Assertions:
    /// - A transient failure is retried and the value returned.
    #[test]
    fn test_execute_async_recovers() {
        let calls = AtomicU32::new(0);
        let policy = quick(3);

        let result = tokio_test::block_on(policy.execute_async(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(DependencyError::connection("queue", "refused"))
                } else {
                    Ok(n)
                }
            }
        }));

        tokio_test::assert_ok!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
