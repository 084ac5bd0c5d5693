use chrono::{DateTime, Duration, Utc};

use crate::config::DEFAULT_BACKOFF_BASE;

/// The retry policy workers use to schedule the next attempt of a failed job.
///
/// Delays grow as `backoff_base ^ attempts` seconds, computed from the
/// post-increment attempt count: the first retry waits `base^1`, the second
/// `base^2`, and so on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    backoff_base: f64,
}

/// What to do with a job whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Attempts remain; lease again once `retry_at` has elapsed.
    Retry { retry_at: DateTime<Utc> },
    /// Retry budget exhausted; park in the dead letter queue.
    Dead,
}

impl RetryPolicy {
    pub fn new(backoff_base: f64) -> Self {
        Self { backoff_base }
    }

    /// Backoff delay before attempt `attempts + 1`, never negative.
    pub fn backoff_delay(&self, attempts: i64) -> Duration {
        let seconds = self.backoff_base.powi(attempts as i32).max(0.0);
        Duration::milliseconds((seconds * 1000.0) as i64)
    }

    /// Decide the next state for a job that just incremented its attempt
    /// count to `new_attempts`.
    pub fn decide(&self, new_attempts: i64, max_retries: i64, now: DateTime<Utc>) -> Decision {
        if new_attempts >= max_retries {
            Decision::Dead
        } else {
            Decision::Retry {
                retry_at: now + self.backoff_delay(new_attempts),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_exponential_in_attempts() {
        let policy = RetryPolicy::new(2.0);
        assert_eq!(policy.backoff_delay(1), Duration::seconds(2));
        assert_eq!(policy.backoff_delay(2), Duration::seconds(4));
        assert_eq!(policy.backoff_delay(3), Duration::seconds(8));
    }

    #[test]
    fn fractional_bases_produce_subsecond_precision() {
        let policy = RetryPolicy::new(1.5);
        assert_eq!(policy.backoff_delay(2), Duration::milliseconds(2250));
    }

    #[test]
    fn exhausted_budget_goes_dead() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        assert_eq!(policy.decide(3, 3, now), Decision::Dead);
        assert_eq!(policy.decide(4, 3, now), Decision::Dead);
    }

    #[test]
    fn remaining_budget_schedules_a_retry() {
        let policy = RetryPolicy::new(2.0);
        let now = Utc::now();
        match policy.decide(1, 3, now) {
            Decision::Retry { retry_at } => assert_eq!(retry_at, now + Duration::seconds(2)),
            Decision::Dead => panic!("expected a retry on the first failure"),
        }
        match policy.decide(2, 3, now) {
            Decision::Retry { retry_at } => assert_eq!(retry_at, now + Duration::seconds(4)),
            Decision::Dead => panic!("expected a retry on the second failure"),
        }
    }
}
