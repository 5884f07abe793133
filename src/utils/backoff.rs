use rand::rng;
use rand::Rng;
use std::time::Duration;

/// Exponential reconnect delay with a cap and optional jitter.
///
/// The first delay after a reset is `initial`; every further call multiplies the previous
/// base delay by `multiplier` until `max` is reached. With jitter enabled the returned delay is
/// scaled by a random factor in `0.5..1.5` and then clamped to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: bool) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0),
            jitter,
            attempt: 0,
        }
    }

    /// A flat delay that never grows.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay, 1.0, false)
    }

    /// Returns the delay to wait before the next attempt and advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.multiplier.powi(self.attempt.min(32) as i32);
        let base = (self.initial.as_secs_f64() * exp).min(self.max.as_secs_f64());
        self.attempt = self.attempt.saturating_add(1);

        let secs = if self.jitter {
            let factor: f64 = rng().random_range(0.5..1.5);
            (base * factor).min(self.max.as_secs_f64())
        } else {
            base
        };
        Duration::from_secs_f64(secs)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
