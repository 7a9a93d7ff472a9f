//! Exponential backoff for starved queue pulls
//!
//! Delays grow geometrically from `initial_delay` and carry random jitter so
//! that a pool of idle workers does not re-poll in lockstep.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Backoff settings in runtime units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// How long one queue pull waits
    pub wait_timeout: Duration,
    pub initial_delay: Duration,
    pub multiplier: f64,
    /// Consecutive timed-out pulls after which a worker gives up
    pub max_attempts: u32,
    pub max_jitter: Duration,
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts,
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl BackoffPolicy {
    /// Delay before the next pull after the `stall`-th consecutive timeout
    ///
    /// `stall` counts from 1; the first stall waits `initial_delay`.
    pub fn delay_for(&self, stall: u32) -> Duration {
        let exponent = stall.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if secs.is_finite() && secs < Duration::MAX.as_secs_f64() {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            Duration::MAX
        }
    }

    /// Adds uniform jitter in `[0, max_jitter]` to a delay
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if self.max_jitter.is_zero() {
            return delay;
        }
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=self.max_jitter.as_millis() as u64);
        delay.saturating_add(Duration::from_millis(jitter_ms))
    }

    /// Returns true once `stall` consecutive timeouts exhaust the budget
    pub fn exhausted(&self, stall: u32) -> bool {
        stall >= self.max_attempts
    }
}
