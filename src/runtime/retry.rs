//! Bounded Retry with Back-off.
//!
//! Waiting on a busy resource is an active poll: each failed attempt is
//! followed by a delay obtained from the policy and spent in an injected
//! `Sleeper`. A policy without an attempt bound retries until the operation
//! succeeds.

use crate::fabric::clock::Sleeper;
use serde::Deserialize;
use std::time::Duration;
use tracing::trace;

const DEFAULT_DELAY_US: u64 = 1;
const DEFAULT_MULTIPLIER: u32 = 1;

/// Delay schedule and attempt bound for a retried operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt, in microseconds.
    #[serde(default = "default_delay_us")]
    pub delay_us: u64,

    /// Upper bound on any single delay, in microseconds.
    #[serde(default = "default_delay_us")]
    pub max_delay_us: u64,

    /// Factor applied to the delay after every failed attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,

    /// Maximum number of attempts; `None` retries until success.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_delay_us() -> u64 {
    DEFAULT_DELAY_US
}

fn default_multiplier() -> u32 {
    DEFAULT_MULTIPLIER
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_micros(DEFAULT_DELAY_US))
    }
}

impl RetryPolicy {
    /// Unbounded retry with a constant delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        let us = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX);
        Self {
            delay_us: us,
            max_delay_us: us,
            multiplier: 1,
            max_attempts: None,
        }
    }

    /// Limits the number of attempts.
    pub fn bounded(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Exponential back-off from `delay` capped at `max_delay`.
    pub fn exponential(delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            delay_us: u64::try_from(delay.as_micros()).unwrap_or(u64::MAX),
            max_delay_us: u64::try_from(max_delay.as_micros()).unwrap_or(u64::MAX),
            multiplier: multiplier.max(1),
            max_attempts: None,
        }
    }

    /// Delay to wait after failed attempt number `failed` (1-based).
    pub fn delay_after(&self, failed: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(failed.saturating_sub(1));
        let cap = self.max_delay_us.max(self.delay_us);
        Duration::from_micros(self.delay_us.saturating_mul(factor).min(cap))
    }
}

/// Result of an operation that eventually succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Result of an operation that failed on every permitted attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub last_error: E,
    pub attempts: u32,
}

/// Runs `op` until it succeeds or the policy's attempt bound is reached.
///
/// No delay follows the final attempt.
pub fn run<T, E>(
    policy: &RetryPolicy,
    sleeper: &mut dyn Sleeper,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<Attempted<T>, Exhausted<E>> {
    let mut attempts = 0u32;
    loop {
        attempts = attempts.saturating_add(1);
        match op() {
            Ok(value) => return Ok(Attempted { value, attempts }),
            Err(last_error) => {
                if policy.max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(Exhausted {
                        last_error,
                        attempts,
                    });
                }
                let delay = policy.delay_after(attempts);
                trace!(attempt = attempts, delay_us = delay.as_micros() as u64, "retrying");
                sleeper.sleep(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::clock::ManualClock;

    #[test]
    fn fixed_policy_waits_between_attempts_only() {
        let mut clock = ManualClock::new();
        let mut remaining = 3;
        let out = run(&RetryPolicy::fixed(Duration::from_micros(5)), &mut clock, || {
            if remaining == 0 {
                Ok(42)
            } else {
                remaining -= 1;
                Err(())
            }
        })
        .unwrap();

        assert_eq!(out.value, 42);
        assert_eq!(out.attempts, 4);
        assert_eq!(clock.sleeps(), 3);
        assert_eq!(clock.elapsed(), Duration::from_micros(15));
    }

    #[test]
    fn bounded_policy_gives_up() {
        let mut clock = ManualClock::new();
        let policy = RetryPolicy::fixed(Duration::from_micros(2)).bounded(3);
        let err = run(&policy, &mut clock, || Err::<(), _>("busy")).unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, "busy");
        assert_eq!(clock.sleeps(), 2);
    }

    #[test]
    fn exponential_delay_is_capped() {
        let policy =
            RetryPolicy::exponential(Duration::from_micros(1), Duration::from_micros(10), 2);
        let delays: Vec<u64> = (1..=6)
            .map(|n| policy.delay_after(n).as_micros() as u64)
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }
}
