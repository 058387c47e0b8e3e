//! Backoff schedules for retryable operations.
//!
//! A backoff is a lazy, stateful sequence of delays: each call to `next()`
//! either returns the delay to wait before the next attempt, or `None` to
//! signal that no further attempts should be made. Callers drive the
//! schedule themselves (`sleep(delay).await` then retry) rather than being
//! handed a future, which keeps the schedule cancel-safe and reusable across
//! both connect-time and request-time retries.

use std::time::Duration;

/// A stateful retry schedule.
pub trait Backoff: Send {
    /// Return the delay before the next attempt, or `None` if no more
    /// attempts should be made.
    fn next(&mut self) -> Option<Duration>;
}

/// A backoff that never retries: the first failure is final.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonRetrying;

impl Backoff for NonRetrying {
    fn next(&mut self) -> Option<Duration> {
        None
    }
}

/// A backoff that waits the same fixed delay between every attempt, up to an
/// optional maximum attempt count. `max_attempts = None` retries forever.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
    attempt: u32,
}

impl FixedDelay {
    /// Create a fixed-delay backoff that retries forever.
    pub fn forever(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
            attempt: 0,
        }
    }

    /// Create a fixed-delay backoff bounded to `max_attempts` retries.
    pub fn bounded(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts),
            attempt: 0,
        }
    }
}

impl Backoff for FixedDelay {
    fn next(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }
        self.attempt += 1;
        Some(self.delay)
    }
}

/// Exponential backoff with jitter-free doubling, an upper bound on the
/// individual delay, and an optional cap on the number of attempts.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_delay: Duration,
    max_attempts: Option<u32>,
    current: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff.
    ///
    /// * `max_delay` - upper bound on any single delay.
    /// * `max_attempts` - stop retrying after this many attempts, or retry
    ///   forever if `None`.
    /// * `initial` - delay before the first retry.
    pub fn new(max_delay: Duration, max_attempts: Option<u32>, initial: Duration) -> Self {
        Self {
            max_delay,
            max_attempts,
            current: initial,
            attempt: 0,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn next(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }
        self.attempt += 1;
        let delay = self.current;
        self.current = (self.current * 2).min(self.max_delay);
        Some(delay)
    }
}
