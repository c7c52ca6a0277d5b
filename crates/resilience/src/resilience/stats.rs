//! Breaker statistics and the status snapshot exposed to callers.

use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::circuit_breaker::CircuitState;
use super::window::{OutcomeWindow, WindowCounts};
use crate::utils::serde::duration_millis;

/// Mutable statistics owned by exactly one breaker.
///
/// Only mutated while the breaker's critical section is held.
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    /// Monotonic instant of the last transition, used for cool-down math
    pub state_changed_at: Instant,
    /// Wall-clock copy of `state_changed_at` for reporting
    pub state_changed_wall: DateTime<Utc>,
    pub recent: OutcomeWindow,
}

impl BreakerStats {
    pub(crate) fn new(window_size: Duration, now: Instant, wall: SystemTime) -> Self {
        Self {
            total_requests: 0,
            total_failures: 0,
            total_successes: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_time: None,
            last_success_time: None,
            state_changed_at: now,
            state_changed_wall: DateTime::<Utc>::from(wall),
            recent: OutcomeWindow::new(window_size),
        }
    }

    pub(crate) fn record_success(&mut self, now: Instant, wall: SystemTime) {
        self.tally(true, now, wall);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    pub(crate) fn record_failure(&mut self, now: Instant, wall: SystemTime) {
        self.tally(false, now, wall);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    /// Count an outcome from an earlier state without touching the streaks.
    pub(crate) fn record_stale(&mut self, success: bool, now: Instant, wall: SystemTime) {
        self.tally(success, now, wall);
    }

    fn tally(&mut self, success: bool, now: Instant, wall: SystemTime) {
        let stamp = Some(DateTime::<Utc>::from(wall));
        self.total_requests += 1;
        if success {
            self.total_successes += 1;
            self.last_success_time = stamp;
        } else {
            self.total_failures += 1;
            self.last_failure_time = stamp;
        }
        self.recent.record(now, success);
    }

    /// Zero the streaks and stamp the transition time.
    pub(crate) fn mark_transition(&mut self, now: Instant, wall: SystemTime) {
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.state_changed_at = now;
        self.state_changed_wall = DateTime::<Utc>::from(wall);
    }

    /// Restore every counter to its initial value.
    pub(crate) fn reset(&mut self, now: Instant, wall: SystemTime) {
        self.total_requests = 0;
        self.total_failures = 0;
        self.total_successes = 0;
        self.last_failure_time = None;
        self.last_success_time = None;
        self.recent.clear();
        self.mark_transition(now, wall);
    }

    /// Window tallies at `now`, read-only.
    pub fn window_counts(&self, now: Instant) -> WindowCounts {
        self.recent.counts_at(now)
    }

    /// Lifetime success fraction; `0.0` before the first request.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_successes as f64 / self.total_requests as f64
        }
    }
}

/// Point-in-time view of one breaker, safe to serialize for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
    /// Time spent in the current state
    #[serde(with = "duration_millis", rename = "time_in_state_ms")]
    pub time_in_state: Duration,
    pub window_requests: u64,
    pub window_failure_rate: f64,
}

impl CircuitBreakerStatus {
    pub(crate) fn capture(
        name: &str,
        state: CircuitState,
        stats: &BreakerStats,
        now: Instant,
    ) -> Self {
        let window = stats.window_counts(now);
        Self {
            name: name.to_string(),
            state,
            total_requests: stats.total_requests,
            total_failures: stats.total_failures,
            total_successes: stats.total_successes,
            success_rate: stats.success_rate(),
            consecutive_failures: stats.consecutive_failures,
            consecutive_successes: stats.consecutive_successes,
            last_failure_time: stats.last_failure_time,
            last_success_time: stats.last_success_time,
            state_changed_at: stats.state_changed_wall,
            time_in_state: now.saturating_duration_since(stats.state_changed_at),
            window_requests: window.requests,
            window_failure_rate: window.failure_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates `BreakerStats` streak bookkeeping.
    ///
    /// Assertions:
    /// - A success clears the failure streak and vice versa.
    /// - Totals keep counting across streak resets.
    #[test]
    fn test_streaks_reset_on_opposite_outcome() {
        let now = Instant::now();
        let wall = SystemTime::now();
        let mut stats = BreakerStats::new(Duration::from_secs(60), now, wall);

        stats.record_failure(now, wall);
        stats.record_failure(now, wall);
        assert_eq!(stats.consecutive_failures, 2);

        stats.record_success(now, wall);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.consecutive_successes, 1);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.total_failures, 2);
        assert!(stats.last_failure_time.is_some());
        assert!(stats.last_success_time.is_some());
    }

    /// Validates `BreakerStats::record_stale` bookkeeping.
    ///
    /// Assertions:
    /// - Totals, timestamps, and the window count the outcome.
    /// - Both streaks keep their values.
    #[test]
    fn test_stale_outcome_leaves_streaks() {
        let now = Instant::now();
        let wall = SystemTime::now();
        let mut stats = BreakerStats::new(Duration::from_secs(60), now, wall);

        stats.record_success(now, wall);
        stats.record_stale(false, now, wall);
        assert_eq!(stats.consecutive_successes, 1);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.total_failures, 1);
        assert!(stats.last_failure_time.is_some());

        stats.record_stale(true, now, wall);
        assert_eq!(stats.consecutive_successes, 1);
        assert_eq!(stats.total_successes, 2);
        assert_eq!(stats.window_counts(now).requests, 3);
    }

    #[test]
    fn test_success_rate_without_requests_is_zero() {
        let stats = BreakerStats::new(Duration::from_secs(1), Instant::now(), SystemTime::now());
        assert_eq!(stats.success_rate(), 0.0);
    }

    /// Validates `BreakerStats::reset` clears everything.
    ///
    /// Assertions:
    /// - Totals, timestamps, and the window are empty after reset.
    #[test]
    fn test_reset_clears_window_and_totals() {
        let now = Instant::now();
        let wall = SystemTime::now();
        let mut stats = BreakerStats::new(Duration::from_secs(60), now, wall);
        stats.record_failure(now, wall);
        stats.record_success(now, wall);

        let later = now + Duration::from_secs(5);
        stats.reset(later, wall);

        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.consecutive_successes, 0);
        assert!(stats.last_failure_time.is_none());
        assert!(stats.recent.is_empty());
        assert_eq!(stats.state_changed_at, later);
    }

    #[test]
    fn test_status_serializes_screaming_state() {
        let now = Instant::now();
        let stats = BreakerStats::new(Duration::from_secs(60), now, SystemTime::now());
        let status = CircuitBreakerStatus::capture("billing", CircuitState::HalfOpen, &stats, now);

        let json = serde_json::to_value(&status).expect("status should serialize");
        assert_eq!(json["state"], "HALF_OPEN");
        assert_eq!(json["name"], "billing");
        assert_eq!(json["time_in_state_ms"], 0);
    }
}
