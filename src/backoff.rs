//! Jittered exponential backoff for transient failures: transport errors,
//! zero-entries responses, and the circuit breaker that stops hammering a
//! log after too many consecutive failures.

use std::time::Duration;

use rand::Rng;

/// Caps retries at this duration regardless of how many failures preceded
/// it: backoff grows but stays bounded.
const MAX_DELAY: Duration = Duration::from_secs(300);
const BASE_DELAY: Duration = Duration::from_millis(500);

/// Tracks consecutive-failure count for one log and produces the delay to
/// wait before the next attempt. Cheap to keep one per monitor; resets on
/// any success.
#[derive(Clone, Debug, Default)]
pub struct Backoff {
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Backoff {
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Call after a successful cycle; clears accumulated failure count.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Call after a failed cycle; returns the delay to wait before retrying.
    pub fn failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.delay()
    }

    /// The delay for the current failure count, with up to 20% jitter so
    /// that many logs backing off at once don't all retry in lockstep.
    pub fn delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exp = self.consecutive_failures.min(16);
        let scaled = BASE_DELAY.saturating_mul(1u32 << exp.min(20));
        let capped = scaled.min(MAX_DELAY);
        let jitter_frac = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_secs_f64(capped.as_secs_f64() * jitter_frac)
    }

    /// True once a log has failed enough in a row that the supervisor's
    /// health check should surface it rather than silently keep retrying.
    pub fn circuit_broken(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_then_caps() {
        let mut b = Backoff::new();
        assert_eq!(b.delay(), Duration::ZERO);
        let mut prev = Duration::ZERO;
        for _ in 0..30 {
            let d = b.failure();
            assert!(d >= prev.mul_f64(0.5) || d <= MAX_DELAY + MAX_DELAY / 5);
            prev = d;
        }
        assert!(b.delay() <= MAX_DELAY + MAX_DELAY / 5);
    }

    #[test]
    fn reset_clears_failures() {
        let mut b = Backoff::new();
        b.failure();
        b.failure();
        assert!(b.consecutive_failures() > 0);
        b.reset();
        assert_eq!(b.consecutive_failures(), 0);
        assert_eq!(b.delay(), Duration::ZERO);
    }

    #[test]
    fn circuit_breaks_after_threshold() {
        let mut b = Backoff::new();
        for _ in 0..5 {
            b.failure();
        }
        assert!(b.circuit_broken(5));
        assert!(!b.circuit_broken(6));
    }
}
