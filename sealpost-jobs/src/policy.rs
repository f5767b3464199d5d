//! Backoff for failed job attempts.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Delay before retry `retry` (1-based).
///
/// # Formula
/// `delay = min(base * 2^(retry - 1) * (1 + j), max)` with `j` drawn from
/// `[0, jitter_factor]`.
///
/// Jitter only ever lengthens the delay, and with `jitter_factor <= 1` the
/// longest draw for retry `n` equals the shortest draw for retry `n + 1`, so
/// successive delays never decrease.
#[must_use]
pub fn calculate_retry_delay(
    retry: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
) -> Duration {
    let exponent = retry.saturating_sub(1);
    let delay = if exponent >= 63 {
        max_delay_ms
    } else {
        base_delay_ms.saturating_mul(1u64 << exponent)
    };

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let jittered = {
        let jitter_factor = jitter_factor.clamp(0.0, 1.0);
        let jitter: f64 = if jitter_factor > 0.0 {
            rand::rng().random_range(0.0..=jitter_factor)
        } else {
            0.0
        };
        ((delay as f64) * (1.0 + jitter)) as u64
    };

    Duration::from_millis(jittered.min(max_delay_ms))
}

/// Retry backoff configuration shared by every job in a queue.
///
/// The number of retries is a per-job budget; this only decides how long to
/// wait between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry (in milliseconds).
    ///
    /// Default: 1000 (1 second)
    #[serde(default = "defaults::base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    /// Ceiling for any single delay (in milliseconds).
    ///
    /// Default: 300000 (5 minutes)
    #[serde(default = "defaults::max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Upper bound of the random stretch applied to each delay, in `[0, 1]`.
    ///
    /// Default: 0.1 (up to +10%)
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_retry_delay_ms: defaults::base_retry_delay_ms(),
            max_retry_delay_ms: defaults::max_retry_delay_ms(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to wait before retry `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        calculate_retry_delay(
            retry,
            self.base_retry_delay_ms,
            self.max_retry_delay_ms,
            self.retry_jitter_factor,
        )
    }
}

mod defaults {
    pub const fn base_retry_delay_ms() -> u64 {
        1_000
    }

    pub const fn max_retry_delay_ms() -> u64 {
        300_000
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_retry_delay_ms, 1_000);
        assert_eq!(policy.max_retry_delay_ms, 300_000);
        assert!((policy.retry_jitter_factor - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exponential_backoff_without_jitter() {
        assert_eq!(calculate_retry_delay(1, 60, 86_400, 0.0).as_millis(), 60);
        assert_eq!(calculate_retry_delay(2, 60, 86_400, 0.0).as_millis(), 120);
        assert_eq!(calculate_retry_delay(3, 60, 86_400, 0.0).as_millis(), 240);
        assert_eq!(
            calculate_retry_delay(20, 60, 86_400, 0.0).as_millis(),
            86_400
        );
        assert_eq!(
            calculate_retry_delay(u32::MAX, 60, 86_400, 0.0).as_millis(),
            86_400
        );
    }

    #[test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    fn test_jitter_only_stretches() {
        for _ in 0..100 {
            let delay = calculate_retry_delay(2, 100, 1_000_000, 0.5).as_millis();
            assert!((200..=300).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    fn test_delays_never_decrease() {
        let policy = RetryPolicy {
            base_retry_delay_ms: 250,
            max_retry_delay_ms: 60_000,
            retry_jitter_factor: 1.0,
        };

        for _ in 0..50 {
            let mut previous = Duration::ZERO;
            for retry in 1..12 {
                let delay = policy.delay_for(retry);
                assert!(delay >= previous, "retry {retry}: {delay:?} < {previous:?}");
                previous = delay;
            }
        }
    }

    #[test]
    fn test_policy_from_ron_uses_defaults() {
        let policy: RetryPolicy = ron::from_str("(base_retry_delay_ms: 10)").expect("parse");
        assert_eq!(policy.base_retry_delay_ms, 10);
        assert_eq!(policy.max_retry_delay_ms, 300_000);
    }
}
