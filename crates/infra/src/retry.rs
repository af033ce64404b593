//! Caller-side retry policy for remote operations.
//!
//! The transfer client never retries on its own; orchestration code wraps
//! calls in [`retry`] and only errors classified as retryable are repeated.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use einvoice_core::Classify;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time.
    Fixed,
    /// base * 2^(attempt-1)
    #[default]
    Exponential,
    /// base * attempt
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = try once).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Fraction of the delay (0.0-1.0) spread deterministically around it.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => (base_ms * 2_f64.powi((attempt - 1).min(30) as i32)).min(max_ms),
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        let jitter_range = delay_ms * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    pub fn should_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }
}

/// Run `op`, retrying retryable failures per `policy` with real sleeps.
pub fn retry<T, E, F>(policy: &RetryPolicy, op: F) -> Result<T, E>
where
    E: Classify,
    F: FnMut() -> Result<T, E>,
{
    retry_with_sleep(policy, thread::sleep, op)
}

/// [`retry`] with an injectable sleep.
pub fn retry_with_sleep<T, E, F, S>(policy: &RetryPolicy, mut sleep: S, mut op: F) -> Result<T, E>
where
    E: Classify,
    F: FnMut() -> Result<T, E>,
    S: FnMut(Duration),
{
    let mut retries = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.retryable() && policy.should_retry(retries) => {
                retries += 1;
                let delay = policy.delay_for_attempt(retries);
                warn!(attempt = retries, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient failure");
                sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use einvoice_transfer::TransferError;
    use proptest::prelude::*;

    #[test]
    fn exponential_delays_grow_and_cap() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::exponential(10, Duration::from_millis(100), Duration::from_millis(1000))
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_millis(1000));
    }

    #[test]
    fn linear_and_fixed_delays() {
        let linear = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
            ..RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(1))
        };
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(300));

        let fixed = RetryPolicy::fixed(2, Duration::from_millis(50));
        assert_eq!(fixed.delay_for_attempt(4), Duration::from_millis(50));
    }

    #[test]
    fn jitter_stays_within_range() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(1000), Duration::from_secs(60));
        for attempt in 1..=5 {
            let nominal = 1000.0 * 2_f64.powi(attempt as i32 - 1);
            let actual = policy.delay_for_attempt(attempt).as_millis() as f64;
            assert!((actual - nominal).abs() <= nominal * 0.1 + 1.0);
        }
    }

    #[test]
    fn transient_errors_are_retried_until_success() {
        let mut calls = 0;
        let mut slept = Vec::new();
        let result: Result<u32, TransferError> = retry_with_sleep(
            &RetryPolicy::fixed(3, Duration::from_millis(5)),
            |d| slept.push(d),
            || {
                calls += 1;
                if calls < 3 {
                    Err(TransferError::Transient("reset".into()))
                } else {
                    Ok(calls)
                }
            },
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(slept.len(), 2);
    }

    #[test]
    fn non_retryable_errors_fail_immediately() {
        let mut calls = 0;
        let result: Result<(), TransferError> = retry_with_sleep(
            &RetryPolicy::fixed(5, Duration::ZERO),
            |_| {},
            || {
                calls += 1;
                Err(TransferError::protocol("bad envelope", None))
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn retries_are_bounded() {
        let mut calls = 0;
        let result: Result<(), TransferError> = retry_with_sleep(
            &RetryPolicy::fixed(2, Duration::ZERO),
            |_| {},
            || {
                calls += 1;
                Err(TransferError::Transient("timeout".into()))
            },
        );
        assert!(matches!(result, Err(TransferError::Transient(_))));
        assert_eq!(calls, 3);
    }

    fn any_strategy() -> impl Strategy<Value = BackoffStrategy> {
        prop_oneof![
            Just(BackoffStrategy::Fixed),
            Just(BackoffStrategy::Exponential),
            Just(BackoffStrategy::Linear),
        ]
    }

    proptest! {
        /// Property: jitter never pushes a delay past the cap by more than its fraction.
        #[test]
        fn delays_respect_the_cap(
            strategy in any_strategy(),
            base_ms in 0u64..5_000,
            extra_ms in 0u64..60_000,
            jitter in 0.0f64..=1.0,
            attempt in 1u32..64,
        ) {
            let policy = RetryPolicy {
                max_retries: 10,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(base_ms + extra_ms),
                strategy,
                jitter,
            };
            let cap = (base_ms + extra_ms) as f64 * (1.0 + jitter) + 1.0;
            prop_assert!((policy.delay_for_attempt(attempt).as_millis() as f64) <= cap);
        }

        /// Property: a permanently failing retryable call runs exactly max_retries + 1 times.
        #[test]
        fn attempts_are_bounded_by_policy(max_retries in 0u32..20) {
            let mut calls = 0u32;
            let mut sleeps = 0u32;
            let result: Result<(), TransferError> = retry_with_sleep(
                &RetryPolicy::fixed(max_retries, Duration::ZERO),
                |_| sleeps += 1,
                || {
                    calls += 1;
                    Err(TransferError::Transient("reset".into()))
                },
            );
            prop_assert!(result.is_err());
            prop_assert_eq!(calls, max_retries + 1);
            prop_assert_eq!(sleeps, max_retries);
        }
    }
}
