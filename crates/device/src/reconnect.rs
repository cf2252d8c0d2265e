//! Back-off policy for re-opening a dropped printer socket.

use std::time::Duration;

/// Jittered exponential back-off between socket reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delay before the first attempt after a drop.
    pub initial_delay: Duration,
    /// Upper bound on the delay, before jitter.
    pub max_delay: Duration,
    /// Growth factor per failed attempt.
    pub backoff_factor: f64,
    /// Consecutive failures tolerated before the client stops trying.
    /// `0` keeps trying forever.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectBackoff {
    /// Fixed delay, no growth.  Handy for tests and simulators.
    pub fn constant(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_factor: 1.0,
            max_attempts: 0,
        }
    }

    /// Delay before attempt `attempt` (0-indexed), with up to 25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let capped_ms = (base_ms * self.backoff_factor.powi(exponent))
            .min(self.max_delay.as_millis() as f64);
        let jitter = capped_ms * 0.25 * spread(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Deterministic fraction in `[0, 1)` so several printers dropping at once
/// do not reconnect in lockstep.
fn spread(attempt: u32) -> f64 {
    let hash = attempt.wrapping_add(1).wrapping_mul(2_654_435_761);
    f64::from(hash) / (f64::from(u32::MAX) + 1.0)
}
