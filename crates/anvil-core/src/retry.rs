//! Bounded exponential-backoff retry

use crate::clock::Clock;
use crate::error::ClassifiedError;
use std::time::Duration;
use tracing::debug;

/// Retry limits and backoff shape
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before the retry that follows failed attempt `attempt` (1-based):
    /// `min(base * multiplier^(attempt-1), max)`. Multipliers below 1.0 are
    /// treated as 1.0 so delays never shrink.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let cap = self.max_delay.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }
}

/// Passed to the retry observer before each backoff wait
#[derive(Debug)]
pub struct RetryNotice<'a> {
    /// The attempt that just failed (1-based)
    pub attempt: u32,
    pub error: &'a ClassifiedError,
    pub delay: Duration,
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is reached. The operation receives the 1-based
/// attempt number.
///
/// The observer is informational only; it cannot alter the retry decision.
pub fn with_retry<T, E, F, O>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    mut observer: O,
    mut operation: F,
) -> Result<T, ClassifiedError>
where
    F: FnMut(u32) -> Result<T, E>,
    E: Into<ClassifiedError>,
    O: FnMut(&RetryNotice<'_>),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                let err: ClassifiedError = err.into();
                if !err.is_retryable() || attempt >= max_attempts {
                    debug!(attempt, code = err.code(), "giving up: {}", err);
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                observer(&RetryNotice {
                    attempt,
                    error: &err,
                    delay,
                });
                clock.sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_millis(10_000));
    }

    #[test]
    fn test_delays_are_monotonic_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 12,
            base_delay: Duration::from_millis(300),
            backoff_multiplier: 1.7,
            max_delay: Duration::from_millis(5000),
        };
        let delays: Vec<Duration> = (1..=40).map(|n| policy.delay_for_attempt(n)).collect();
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(delays.iter().all(|d| *d <= policy.max_delay));
    }

    #[test]
    fn test_shrinking_multiplier_holds_delay_steady() {
        let policy = RetryPolicy {
            backoff_multiplier: 0.5,
            ..RetryPolicy::default()
        };
        let delays: Vec<Duration> = (1..=4).map(|n| policy.delay_for_attempt(n)).collect();
        assert_eq!(delays, vec![Duration::from_millis(1000); 4]);

        let nan = RetryPolicy {
            backoff_multiplier: f64::NAN,
            ..RetryPolicy::default()
        };
        assert_eq!(nan.delay_for_attempt(3), Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_bound_on_always_failing_operation() {
        let clock = ManualClock::new();
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), &clock, |_| {}, |attempt| {
            calls += 1;
            Err(ClassifiedError::network(format!("attempt {}", attempt), Some(503), None))
        });

        assert_eq!(calls, 3);
        let err = result.unwrap_err();
        assert_eq!(err, ClassifiedError::network("attempt 3", Some(503), None));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
    }

    #[test]
    fn test_non_retryable_short_circuits() {
        let clock = ManualClock::new();
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), &clock, |_| {}, |_| {
            calls += 1;
            Err(ClassifiedError::validation(Some("prompt"), "prompt is required"))
        });

        assert_eq!(calls, 1);
        assert_eq!(result.unwrap_err().kind().label(), "validation");
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_success_after_transient_failure() {
        let clock = ManualClock::new();
        let mut notices = Vec::new();
        let value = with_retry(
            &RetryPolicy::default(),
            &clock,
            |n: &RetryNotice<'_>| notices.push((n.attempt, n.delay, n.error.code())),
            |attempt| {
                if attempt < 2 {
                    Err(ClassifiedError::generation(Some("mesh-preview"), "busy"))
                } else {
                    Ok(attempt * 10)
                }
            },
        )
        .unwrap();

        assert_eq!(value, 20);
        assert_eq!(
            notices,
            vec![(1, Duration::from_millis(1000), crate::error::GENERATION_ERROR)]
        );
    }

    #[test]
    fn test_raw_errors_are_classified() {
        let clock = ManualClock::new();
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), &clock, |_| {}, |_| {
            calls += 1;
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
        });
        assert_eq!(calls, 3);
        assert_eq!(result.unwrap_err().kind().label(), "network");
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let clock = ManualClock::new();
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let mut calls = 0;
        let _: Result<(), _> = with_retry(&policy, &clock, |_| {}, |_| {
            calls += 1;
            Err(ClassifiedError::network("x", None, None))
        });
        assert_eq!(calls, 1);
    }
}
