//! Delay applied before a failed job goes back on the work queue.

use std::time::Duration;

/// Exponential backoff: `base * 2^(retry - 1)`, capped at `max`.
///
/// A zero `base` (the default) re-queues immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl RetryBackoff {
    /// Re-queue immediately.
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn is_immediate(&self) -> bool {
        self.base.is_zero()
    }

    /// Delay before attempt number `retry_count + 1` (`retry_count` is 1-based).
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        if self.is_immediate() || retry_count <= 0 {
            return Duration::ZERO;
        }

        let exponent = (retry_count - 1).min(31) as u32;
        self.base
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max)
            .min(self.max.max(self.base))
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_always_immediate() {
        let backoff = RetryBackoff::none();
        assert_eq!(backoff.delay_for(1), Duration::ZERO);
        assert_eq!(backoff.delay_for(3), Duration::ZERO);
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let backoff = RetryBackoff::exponential(Duration::from_millis(100), Duration::from_millis(350));

        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(350));
        assert_eq!(backoff.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn max_below_base_falls_back_to_base() {
        let backoff = RetryBackoff::exponential(Duration::from_secs(2), Duration::ZERO);
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(5), Duration::from_secs(2));
    }

    #[test]
    fn non_positive_retry_count_has_no_delay() {
        let backoff = RetryBackoff::exponential(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(0), Duration::ZERO);
        assert_eq!(backoff.delay_for(-1), Duration::ZERO);
    }
}
