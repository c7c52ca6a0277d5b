//! Time-bounded log of recent call outcomes.
//!
//! An [`OutcomeWindow`] keeps `(Instant, success)` samples in insertion
//! order and drops every sample older than the configured window span
//! relative to the latest recording. It backs the failure-rate rule of the
//! circuit breaker.
//!
//! # Complexity
//! - `record` and `prune` are amortized **O(k)** in the number of expired
//!   samples; `counts_at` is **O(n)** and never mutates.
//!
//! # Bounds
//! - The window also carries a sample capacity. When a burst records more
//!   samples than the capacity inside one span, the oldest sample is evicted
//!   first, as in a ring buffer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Hard cap on retained samples per window.
pub const DEFAULT_MAX_SAMPLES: usize = 10_000;

/// Success/failure tallies over the live part of a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    /// Samples inside the window
    pub requests: u64,
    /// Failed samples inside the window
    pub failures: u64,
}

impl WindowCounts {
    /// Failure fraction in `[0.0, 1.0]`; `0.0` for an empty window.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }
}

/// A sliding, time-bounded record of call outcomes.
///
/// # Examples
///
/// ```rust
/// use std::time::{Duration, Instant};
///
/// use bulwark_resilience::resilience::window::OutcomeWindow;
///
/// let start = Instant::now();
/// let mut window = OutcomeWindow::new(Duration::from_secs(10));
/// window.record(start, false);
/// window.record(start + Duration::from_secs(4), true);
///
/// let counts = window.counts_at(start + Duration::from_secs(12));
/// assert_eq!(counts.requests, 1);
/// assert_eq!(counts.failures, 0);
/// ```
#[derive(Debug, Clone)]
pub struct OutcomeWindow {
    samples: VecDeque<(Instant, bool)>,
    span: Duration,
    capacity: usize,
}

impl OutcomeWindow {
    /// Creates an empty window spanning `span`.
    #[must_use]
    pub fn new(span: Duration) -> Self {
        Self::with_capacity(span, DEFAULT_MAX_SAMPLES)
    }

    /// Creates an empty window with an explicit sample capacity.
    ///
    /// A capacity of zero is clamped to `1`.
    #[must_use]
    pub fn with_capacity(span: Duration, capacity: usize) -> Self {
        Self { samples: VecDeque::new(), span, capacity: capacity.max(1) }
    }

    /// Appends one outcome and drops samples that fell out of the span.
    pub fn record(&mut self, at: Instant, success: bool) {
        if self.samples.len() >= self.capacity {
            let _ = self.samples.pop_front();
        }
        self.samples.push_back((at, success));
        self.prune(at);
    }

    /// Drops every sample older than the span relative to `now`.
    pub fn prune(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.samples.front() {
            if self.is_expired(at, now) {
                let _ = self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Removes every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Tallies the samples still inside the span at `now` without pruning.
    #[must_use]
    pub fn counts_at(&self, now: Instant) -> WindowCounts {
        self.samples
            .iter()
            .filter(|(at, _)| !self.is_expired(*at, now))
            .fold(WindowCounts::default(), |mut counts, (_, success)| {
                counts.requests += 1;
                if !success {
                    counts.failures += 1;
                }
                counts
            })
    }

    /// Number of retained samples, including any not yet pruned.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no samples are retained.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The configured span.
    #[inline]
    #[must_use]
    pub fn span(&self) -> Duration {
        self.span
    }

    fn is_expired(&self, at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(at) > self.span
    }
}
