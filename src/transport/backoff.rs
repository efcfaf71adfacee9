use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_base_delay() -> u64 {
    5_000
}
fn default_max_delay() -> u64 {
    300_000
}
fn default_growth_factor() -> f64 {
    1.5
}
fn default_jitter() -> f64 {
    0.1
}
fn default_max_attempts() -> u32 {
    1000
}

/// Exponential reconnect schedule:
/// `delay = min(max, base * growth^attempts * (1 + jitter * sample))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
    /// Upper bound of the random stretch applied to each delay (0.1 = up to +10%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            growth_factor: default_growth_factor(),
            jitter: default_jitter(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given attempt count with a caller-supplied jitter sample in `[0, 1)`.
    pub fn delay(&self, attempts: u32, jitter_sample: f64) -> Duration {
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let stretch = 1.0 + self.jitter.max(0.0) * jitter_sample.clamp(0.0, 1.0);
        let raw = self.base_delay_ms as f64 * self.growth_factor.powi(exponent) * stretch;
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Delay without jitter; non-decreasing in `attempts`.
    pub fn nominal_delay(&self, attempts: u32) -> Duration {
        self.delay(attempts, 0.0)
    }

    pub fn next_delay(&self, attempts: u32) -> Duration {
        self.delay(attempts, rand::random::<f64>())
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Jittered exponential delay while the budget lasts, then a flat
    /// `max_delay_ms` for every further attempt.
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        if self.exhausted(attempts) {
            Duration::from_millis(self.max_delay_ms)
        } else {
            self.next_delay(attempts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_defaults() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay_ms, 5_000);
        assert_eq!(policy.max_delay_ms, 300_000);
        assert_eq!(policy.growth_factor, 1.5);
        assert_eq!(policy.max_attempts, 1000);
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.nominal_delay(0), Duration::from_millis(5_000));
        assert_eq!(policy.nominal_delay(1), Duration::from_millis(7_500));
        assert_eq!(policy.nominal_delay(2), Duration::from_millis(11_250));
    }

    #[test]
    fn test_backoff_monotonic_and_capped() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for attempts in 0..2000 {
            let delay = policy.nominal_delay(attempts);
            assert!(delay >= previous, "attempt {attempts} went backwards");
            assert!(delay <= Duration::from_millis(policy.max_delay_ms));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_millis(300_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let delay = policy.next_delay(0);
            assert!(delay >= Duration::from_millis(5_000));
            assert!(delay <= Duration::from_millis(5_500));
        }
        // the cap also applies after jitter
        assert_eq!(policy.delay(500, 0.99), Duration::from_millis(300_000));
    }

    #[test]
    fn test_exhaustion() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }

    #[test]
    fn test_retry_delay_flattens_after_exhaustion() {
        let policy = BackoffPolicy {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            max_attempts: 2,
            ..Default::default()
        };
        assert!(policy.retry_delay(0) <= Duration::from_millis(110));
        assert_eq!(policy.retry_delay(2), Duration::from_millis(1_000));
        assert_eq!(policy.retry_delay(u32::MAX), Duration::from_millis(1_000));
    }
}
