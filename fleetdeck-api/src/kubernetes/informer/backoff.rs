//! Exponential backoff with jitter for watch restarts

use rand::Rng;
use std::time::Duration;

/// Delay schedule between watch retries
///
/// Each call to [`WatchBackoff::next_delay`] multiplies the base delay until it
/// reaches `max`, then applies symmetric jitter so that many clusters failing
/// together do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct WatchBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    current: Duration,
}

impl WatchBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
            current: initial,
        }
    }

    /// Next delay to sleep before retrying
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        let grown = base.as_secs_f64() * self.multiplier;
        self.current = Duration::from_secs_f64(grown.min(self.max.as_secs_f64()));

        if self.jitter == 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }

    /// Start over from the initial delay after a healthy period
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
