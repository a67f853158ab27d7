//! Exponential backoff with jitter, shared by broker reconnects and forward retries.

use std::time::Duration;

use rand::Rng;

/// Doubling delay schedule capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Build from a `(min, max)` millisecond pair as parsed from configuration.
    pub fn from_range_ms((initial, max): (u64, u64)) -> Self {
        Self::new(Duration::from_millis(initial), Duration::from_millis(max))
    }

    /// Upper bound of the delay before retry number `retry` (zero-based).
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(31);
        self.initial
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Delay before retry number `retry`, drawn from the upper half of the ceiling.
    pub fn delay(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling(retry).as_millis() as u64;
        let ms = rand::thread_rng().gen_range(ceiling / 2..=ceiling);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_doubles_until_cap() {
        let backoff = Backoff::from_range_ms((100, 1000));
        assert_eq!(backoff.ceiling(0), Duration::from_millis(100));
        assert_eq!(backoff.ceiling(1), Duration::from_millis(200));
        assert_eq!(backoff.ceiling(3), Duration::from_millis(800));
        assert_eq!(backoff.ceiling(4), Duration::from_millis(1000));
        assert_eq!(backoff.ceiling(200), Duration::from_millis(1000));
    }

    #[test]
    fn test_delay_within_jitter_bounds() {
        let backoff = Backoff::from_range_ms((100, 1000));
        for retry in 0..8 {
            let ceiling = backoff.ceiling(retry);
            let delay = backoff.delay(retry);
            assert!(delay <= ceiling, "retry {retry}: {delay:?} > {ceiling:?}");
            assert!(delay >= ceiling / 2, "retry {retry}: {delay:?} < half of {ceiling:?}");
        }
    }

    #[test]
    fn test_max_never_below_initial() {
        let backoff = Backoff::from_range_ms((500, 10));
        assert_eq!(backoff.max(), Duration::from_millis(500));
        assert!(backoff.delay(0) >= Duration::from_millis(250));
    }

    #[test]
    fn test_new_clamps_max_to_initial() {
        let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(backoff.initial(), Duration::from_secs(2));
        assert_eq!(backoff.max(), Duration::from_secs(2));
        assert_eq!(backoff.ceiling(3), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_backoff() {
        let backoff = Backoff::from_range_ms((0, 0));
        assert_eq!(backoff.delay(5), Duration::ZERO);
    }
}
