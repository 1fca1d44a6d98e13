//! Upstream retry schedule: exponential backoff with jitter.

use rand::random;
use relay_config::RetryConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, first call included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fractional spread applied to each delay (0.1 = ±10%).
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `retry` (0-based), capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * 2f64.powi(retry.min(30) as i32);
        let factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        Duration::from_secs_f64((base * factor).clamp(0.0, self.max_delay.as_secs_f64()))
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(cfg: RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: cfg.base_delay,
            max_delay: cfg.max_delay,
            jitter: 0.1,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}
