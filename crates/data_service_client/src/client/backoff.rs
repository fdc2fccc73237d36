//! src/client/backoff.rs
//!
//! Retry backoff for calls against preemptible servers.
//!
//! Delays grow exponentially from `first` up to the `max` cap, with a
//! small proportional jitter on top. The growth factor dominates the
//! jitter, so successive delays never shrink.

use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub(crate) struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Cap on the delay.
    pub max: Duration,
    /// Multiplicative growth per retry.
    pub factor: f64,
    /// Upper bound of the proportional jitter (0.1 = up to +10%).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(10),
            max: Duration::from_secs(5),
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Delay to apply before retry number `num_retries` (0-based).
    pub fn delay(&self, num_retries: u32) -> Duration {
        let max = self.max.as_secs_f64();
        let base = self.first.as_secs_f64() * self.factor.powi(num_retries as i32);
        let capped = if base.is_finite() { base.min(max) } else { max };
        let jittered = if self.jitter > 0.0 {
            capped * (1.0 + rand::rng().random_range(0.0..self.jitter))
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.min(max))
    }
}

/// Runs `call` until it succeeds or fails with a non-transient error.
///
/// Transient failures sleep through the backoff schedule and try again,
/// without a deadline. Used for job registration, where the dispatcher
/// may be briefly unavailable at startup.
pub(crate) fn retry_transient<T>(
    policy: &BackoffPolicy,
    description: &str,
    mut call: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut num_retries: u32 = 0;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(status) if status.is_transient() => {
                let delay = policy.delay(num_retries);
                tracing::warn!(
                    error = %status,
                    retry_in_ms = delay.as_millis() as u64,
                    "transient failure while trying to {description}"
                );
                thread::sleep(delay);
                num_retries = num_retries.saturating_add(1);
            }
            Err(status) => return Err(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Code, Status};
    use std::cell::Cell;

    #[test]
    fn delays_are_monotonically_non_decreasing_up_to_the_cap() {
        let policy = BackoffPolicy::default();
        let delays: Vec<Duration> = (0..16).map(|i| policy.delay(i)).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "delay shrank: {:?}", pair);
        }
        assert_eq!(*delays.last().unwrap(), policy.max);
    }

    #[test]
    fn first_delay_stays_near_the_initial_value() {
        let policy = BackoffPolicy::default();
        let delay = policy.delay(0);
        assert!(delay >= policy.first);
        assert!(delay <= policy.first.mul_f64(1.0 + policy.jitter));
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay(2), Duration::from_millis(40));
        assert_eq!(policy.delay(2), Duration::from_millis(40));
    }

    #[test]
    fn retry_transient_retries_until_success() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(1),
            max: Duration::from_millis(2),
            factor: 2.0,
            jitter: 0.0,
        };
        let attempts = Cell::new(0);
        let result = retry_transient(&policy, "reach the test server", || {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 {
                Err(Status::unavailable("still starting"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn retry_transient_surfaces_terminal_errors() {
        let policy = BackoffPolicy::default();
        let result: Result<(), _> = retry_transient(&policy, "do a doomed thing", || {
            Err(Status::invalid_argument("bad request"))
        });
        assert_eq!(result.unwrap_err().code, Code::InvalidArgument);
    }
}
