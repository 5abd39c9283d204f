//! # Backoff Module
//!
//! Exponential backoff scheduling shared by the retry queue and the worker's
//! adapter reopen gate. A [`Backoff`] is an immutable delay schedule; a
//! [`Tracker`] binds one schedule to one subject's attempt count and
//! last-attempt timestamp.
//!
//! Timekeeping uses [`tokio::time::Instant`] so schedules run against the
//! runtime clock (and auto-advance under `tokio::test(start_paused = true)`).

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default number of escalating steps before the delay clamps
pub const DEFAULT_MAX_ATTEMPTS: u32 = 15;

/// Immutable exponential delay schedule.
///
/// Attempt 0 maps to zero delay; attempt `i` in `[1, max_attempts]` maps to
/// `2^i` seconds; later attempts clamp to `2^max_attempts`.
#[derive(Debug, Clone)]
pub struct Backoff {
    max_attempts: u32,
    deltas: Vec<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl Backoff {
    /// Create a schedule with `max_attempts` escalating steps
    pub fn new(max_attempts: u32) -> Self {
        assert!(max_attempts > 0, "`max_attempts` must be greater than zero");
        let deltas = (0..=max_attempts)
            .map(|i| {
                if i == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_secs(1u64 << i)
                }
            })
            .collect();
        Self {
            max_attempts,
            deltas,
        }
    }

    /// Create a schedule from an explicit delta table; entry `i` is the
    /// delay after `i` attempts. Used by tests and custom policies.
    pub fn with_deltas(deltas: Vec<Duration>) -> Self {
        assert!(!deltas.is_empty(), "`deltas` must not be empty");
        Self {
            max_attempts: (deltas.len() - 1) as u32,
            deltas,
        }
    }

    /// Number of escalating steps before the delay clamps
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Get the scheduled delay for a given attempt count, clamped on overflow
    pub fn delay(&self, attempts: i64) -> Duration {
        let index = attempts.clamp(0, (self.deltas.len() - 1) as i64) as usize;
        self.deltas[index]
    }

    /// Time elapsed since the last attempt, zero when none was made
    pub fn elapsed(&self, last_attempt: Option<Instant>) -> Duration {
        match last_attempt {
            Some(last) => Instant::now().saturating_duration_since(last),
            None => Duration::ZERO,
        }
    }

    /// Time remaining in the current backoff period
    pub fn remaining(&self, attempts: i64, last_attempt: Option<Instant>) -> Duration {
        if attempts <= 0 {
            return Duration::ZERO;
        }
        match last_attempt {
            Some(_) => self
                .delay(attempts)
                .saturating_sub(self.elapsed(last_attempt)),
            None => Duration::ZERO,
        }
    }

    /// Instant at which the current backoff period expires; `None` means
    /// immediately eligible
    pub fn expires(&self, attempts: i64, last_attempt: Option<Instant>) -> Option<Instant> {
        if attempts <= 0 || last_attempt.is_none() {
            return None;
        }
        Some(Instant::now() + self.remaining(attempts, last_attempt))
    }

    /// Returns true if the subject is outside its backoff period
    pub fn expired(&self, attempts: i64, last_attempt: Option<Instant>) -> bool {
        self.remaining(attempts, last_attempt).is_zero()
    }

    /// Sleep for the remaining backoff period, bounded by `max_wait`.
    /// With zero attempts this is a no-op.
    pub async fn wait(&self, attempts: i64, last_attempt: Option<Instant>, max_wait: Duration) {
        let remaining = self.remaining(attempts, last_attempt);
        if attempts <= 0 || remaining.is_zero() {
            return;
        }
        tokio::time::sleep(remaining.min(max_wait)).await;
    }
}

/// Per-subject backoff bookkeeping: one schedule plus an attempt count and
/// last-attempt timestamp
#[derive(Debug, Clone)]
pub struct Tracker {
    backoff: Arc<Backoff>,
    attempts: i64,
    last_attempt: Option<Instant>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(Arc::new(Backoff::default()))
    }
}

impl Tracker {
    /// Create a tracker bound to the given schedule
    pub fn new(backoff: Arc<Backoff>) -> Self {
        Self {
            backoff,
            attempts: 0,
            last_attempt: None,
        }
    }

    /// Attempt count so far
    pub fn attempts(&self) -> i64 {
        self.attempts
    }

    /// Timestamp of the last recorded attempt
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Scheduled delay for the current attempt count
    pub fn delta(&self) -> Duration {
        self.backoff.delay(self.attempts)
    }

    /// Time elapsed since the last attempt
    pub fn elapsed(&self) -> Duration {
        self.backoff.elapsed(self.last_attempt)
    }

    /// Time remaining in the current backoff period
    pub fn remaining(&self) -> Duration {
        self.backoff.remaining(self.attempts, self.last_attempt)
    }

    /// Instant at which the current backoff period expires
    pub fn expires(&self) -> Option<Instant> {
        self.backoff.expires(self.attempts, self.last_attempt)
    }

    /// Returns true if the subject is outside its backoff period
    pub fn expired(&self) -> bool {
        self.backoff.expired(self.attempts, self.last_attempt)
    }

    /// Sleep out the remaining backoff period, bounded by `max_wait`
    pub async fn wait(&self, max_wait: Duration) {
        self.backoff
            .wait(self.attempts, self.last_attempt, max_wait)
            .await;
    }

    /// Record one attempt now
    pub fn attempt(&mut self) {
        self.attempts += 1;
        self.last_attempt = Some(Instant::now());
    }

    /// Clear the attempt count and timestamp
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_attempt = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_delay_schedule() {
        let backoff = Backoff::default();

        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(15), Duration::from_secs(32768));
    }

    #[test]
    fn test_delay_clamps_on_overflow() {
        let backoff = Backoff::default();

        for k in 0..5 {
            assert_eq!(backoff.delay(15 + k), backoff.delay(15));
        }
    }

    #[test]
    fn test_delay_negative_attempts_clamp_to_zero() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(i64::MIN), Duration::ZERO);
    }

    #[test]
    fn test_custom_deltas() {
        let backoff = Backoff::with_deltas(vec![
            Duration::ZERO,
            Duration::from_millis(10),
            Duration::from_millis(20),
        ]);

        assert_eq!(backoff.max_attempts(), 2);
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(100), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_and_expired() {
        let backoff = Backoff::default();
        let last = Some(Instant::now());

        assert!(backoff.expired(0, None));
        assert!(!backoff.expired(1, last));
        assert_eq!(backoff.remaining(1, last), Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(backoff.expired(1, last));
        assert_eq!(backoff.remaining(1, last), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_noop_without_attempts() {
        let backoff = Backoff::default();
        let before = Instant::now();

        backoff.wait(0, None, Duration::from_secs(60)).await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_bounded_by_max_wait() {
        let backoff = Backoff::default();
        let mut tracker = Tracker::new(Arc::new(backoff));
        tracker.attempt();
        tracker.attempt();

        let before = Instant::now();
        tracker.wait(Duration::from_secs(1)).await;
        assert_eq!(Instant::now() - before, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_attempt_and_reset() {
        let mut tracker = Tracker::default();

        assert_eq!(tracker.attempts(), 0);
        assert!(tracker.expired());

        tracker.attempt();
        assert_eq!(tracker.attempts(), 1);
        assert!(tracker.last_attempt().is_some());
        assert_eq!(tracker.delta(), Duration::from_secs(2));
        assert!(!tracker.expired());

        tracker.reset();
        assert_eq!(tracker.attempts(), 0);
        assert!(tracker.last_attempt().is_none());
        assert!(tracker.expired());
    }
}
