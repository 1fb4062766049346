//! Jittered exponential backoff for pub/sub resubscription

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay used as +/- jitter (0.0 disables it)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl From<&crate::config::RedisConfig> for BackoffConfig {
    fn from(config: &crate::config::RedisConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.backoff_initial_delay_ms),
            max_delay: Duration::from_millis(config.backoff_max_delay_ms),
            ..Default::default()
        }
    }
}

pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt; the first call returns the initial delay.
    pub fn next_delay(&mut self) -> Duration {
        let base_ms = self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(self.attempt as i32);
        let capped_ms = base_ms.min(self.config.max_delay.as_millis() as f64);
        self.attempt = self.attempt.saturating_add(1);

        let delay_ms = if self.config.jitter_factor > 0.0 {
            let spread = capped_ms * self.config.jitter_factor;
            capped_ms + rand::rng().random_range(-spread..=spread)
        } else {
            capped_ms
        };

        Duration::from_millis(delay_ms.max(1.0) as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
