use std::time::Duration;

use rand::Rng;

/// Delay policy applied before a failed job becomes eligible again.
///
/// The default doubles a 2 second base per attempt, caps at one hour, and
/// spreads claimants with ±25% jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base: Duration::from_secs(2),
            max: Duration::from_secs(3600),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        RetryPolicy { base, max, jitter }
    }

    /// A fixed delay with no growth and no jitter. Mostly useful in tests.
    pub fn fixed(delay: Duration) -> Self {
        RetryPolicy {
            base: delay,
            max: delay,
            jitter: 0.0,
        }
    }

    /// Backoff for the given attempt number (1-based).
    pub fn delay(&self, attempt: i64) -> Duration {
        let exponent = attempt.clamp(1, 30) as u32 - 1;
        let grown = self
            .base
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max)
            .min(self.max);

        if self.jitter <= 0.0 {
            return grown;
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        grown.mul_f64((1.0 + spread).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_without_jitter() {
        let policy = RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(3600), 0.0);
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(5), Duration::from_secs(32));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(60), 0.0);
        assert_eq!(policy.delay(20), Duration::from_secs(60));
        assert_eq!(policy.delay(1000), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(Duration::from_secs(8), Duration::from_secs(3600), 0.25);
        for _ in 0..100 {
            let d = policy.delay(1);
            assert!(d >= Duration::from_secs(6), "{d:?}");
            assert!(d <= Duration::from_secs(10), "{d:?}");
        }
    }

    #[test]
    fn fixed_policy_never_varies() {
        let policy = RetryPolicy::fixed(Duration::from_millis(10));
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(7), Duration::from_millis(10));
    }
}
