//! Exponential reconnect backoff with jitter

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Delay generator for reconnect attempts.
///
/// The n-th delay is `min * factor^n`, moved up or down by a random share of
/// at most `jitter` of itself, then clamped to `[min, max]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    pub fn next(&mut self) -> Duration {
        self.next_with(&mut rand::thread_rng())
    }

    pub fn next_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let min = self.config.min_ms as f64;
        let max = self.config.max_ms as f64;
        let exponent = i32::try_from(self.attempts).unwrap_or(i32::MAX);
        let mut ms = (min * self.config.factor.powi(exponent)).min(max);
        self.attempts = self.attempts.saturating_add(1);

        if self.config.jitter > 0.0 {
            let r: f64 = rng.gen();
            let deviation = (r * self.config.jitter * ms).floor();
            ms = if ((r * 10.0).floor() as u32) & 1 == 0 {
                ms - deviation
            } else {
                ms + deviation
            };
        }
        Duration::from_millis(ms.clamp(min, max) as u64)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
