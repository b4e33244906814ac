//! Exponential backoff for the outbound publish path.

use std::time::Duration;

/// Exponential backoff with an upper cap and optional jitter.
///
/// The delay for attempt `n` is `min * factor^n`, capped at `max`. With
/// jitter enabled the delay is drawn uniformly between `min` and the computed
/// value, which eases contention when many writers retry at once.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: bool,
}

impl Backoff {
    /// Creates a backoff with the runtime's publish defaults: cap at three
    /// times the base delay, factor 2, jitter on.
    #[must_use]
    pub fn new(min: Duration) -> Self {
        Self {
            min,
            max: min.saturating_mul(3),
            factor: 2.0,
            jitter: true,
        }
    }

    /// Overrides the delay cap.
    #[must_use]
    pub const fn max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Overrides the growth factor.
    #[must_use]
    pub const fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub const fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay for the given attempt number, starting at zero.
    #[must_use]
    pub fn for_attempt(&self, attempt: u32) -> Duration {
        let min = self.min.as_secs_f64();
        let raw = min * self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = raw.min(self.max.as_secs_f64());
        let secs = if self.jitter && capped > min {
            min + (capped - min) * rand::random::<f64>()
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_waits_the_base_delay() {
        let backoff = Backoff::new(Duration::from_millis(100));
        assert_eq!(backoff.for_attempt(0), Duration::from_millis(100));
    }

    #[test]
    fn delay_doubles_per_attempt_without_jitter() {
        let backoff = Backoff::new(Duration::from_millis(100))
            .max(Duration::from_secs(10))
            .jitter(false);
        assert_eq!(backoff.for_attempt(1), Duration::from_millis(200));
        assert_eq!(backoff.for_attempt(2), Duration::from_millis(400));
        assert_eq!(backoff.for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        let backoff = Backoff::new(Duration::from_secs(1)).jitter(false);
        // cap defaults to three times the base
        assert_eq!(backoff.for_attempt(5), Duration::from_secs(3));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let backoff = Backoff::new(Duration::from_millis(100));
        for attempt in 0..6 {
            let delay = backoff.for_attempt(attempt);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }
}
