//! Retry backoff as a pure function plus an injectable sleep.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::RetryConfig;

/// Shortest wait between two attempts of a task.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// `base * multiplier^(attempt-1)`. Attempt numbering starts at 1.
pub fn backoff(attempt: u32, base: Duration, multiplier: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(63) as i32;
    let factor = multiplier.max(1.0).powi(exponent);
    let millis = base.as_millis() as f64 * factor;
    if !millis.is_finite() || millis >= u64::MAX as f64 {
        return Duration::from_millis(u64::MAX);
    }
    Duration::from_millis(millis.round() as u64)
}

impl RetryConfig {
    /// Delay before retry number `attempt`, capped at `max_delay_ms` and
    /// never below [`MIN_RETRY_DELAY`].
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff(
            attempt,
            Duration::from_millis(self.base_delay_ms),
            self.multiplier,
        )
        .min(Duration::from_millis(self.max_delay_ms))
        .max(MIN_RETRY_DELAY)
    }
}

/// Timed wait used between retries; swapped out in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_waits_the_base_delay() {
        assert_eq!(
            backoff(1, Duration::from_millis(100), 2.0),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn delay_grows_geometrically() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(2, base, 2.0), Duration::from_millis(200));
        assert_eq!(backoff(4, base, 2.0), Duration::from_millis(800));
        assert_eq!(backoff(3, base, 1.5), Duration::from_millis(225));
    }

    #[test]
    fn huge_attempts_saturate_instead_of_overflowing() {
        let d = backoff(u32::MAX, Duration::from_secs(1), 10.0);
        assert_eq!(d, Duration::from_millis(u64::MAX));
    }

    #[test]
    fn config_caps_at_max_delay() {
        let cfg = RetryConfig {
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1000,
        };
        assert_eq!(cfg.delay(1).as_millis(), 100);
        assert_eq!(cfg.delay(3).as_millis(), 400);
        assert_eq!(cfg.delay(10).as_millis(), 1000);
    }

    #[test]
    fn zero_base_delay_still_waits() {
        let cfg = RetryConfig {
            base_delay_ms: 0,
            multiplier: 2.0,
            max_delay_ms: 0,
        };
        assert_eq!(cfg.delay(1), MIN_RETRY_DELAY);
        assert_eq!(cfg.delay(5), MIN_RETRY_DELAY);
    }
}
