//! Pre-defined retry policies for common dependency types

use std::time::Duration;

use super::retry::{RetryCondition, RetryPolicy, WaitStrategy};
use crate::error::FailureReason;

/// Sockets and plain network calls: connection and timeout failures,
/// 3 attempts, exponential 1s to 10s.
pub fn network() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        wait: WaitStrategy::exponential(Duration::from_secs(1), Duration::from_secs(10)),
        condition: RetryCondition::on([FailureReason::Connection, FailureReason::Timeout]),
    }
}

/// Third-party HTTP APIs: also rate limits and 5xx, 5 attempts,
/// exponential 2s to 60s with up to 1s of jitter, honoring "retry after".
pub fn external_service() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        wait: WaitStrategy::exponential(Duration::from_secs(2), Duration::from_secs(60))
            .with_jitter(Duration::from_secs(1))
            .respecting_retry_after(true),
        condition: RetryCondition::on([
            FailureReason::Connection,
            FailureReason::Timeout,
            FailureReason::RateLimited,
            FailureReason::ServerError,
        ]),
    }
}

/// Databases: deadlocks, timeouts, and lost connections, 3 attempts,
/// fixed 500ms.
pub fn datastore() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        wait: WaitStrategy::fixed(Duration::from_millis(500)),
        condition: RetryCondition::on([
            FailureReason::Deadlock,
            FailureReason::Timeout,
            FailureReason::Connection,
        ]),
    }
}

/// Run once, never retry.
pub fn no_retry() -> RetryPolicy {
    RetryPolicy { max_attempts: 1, wait: WaitStrategy::none(), condition: RetryCondition::Never }
}
