use rand;
use std::time::Duration;

use crate::config::RetryConfig;

/// Exponential backoff between attempts of an aborted transaction
#[derive(Debug)]
pub struct ExponentialBackoff {
    /// Current attempt number
    current_attempt: usize,
    /// Configuration for the retry strategy
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current_attempt: 0,
            config,
        }
    }

    /// Number of backoffs handed out so far
    pub fn attempts(&self) -> usize {
        self.current_attempt
    }

    /// Get the next backoff duration, or None once every attempt is spent.
    ///
    /// `max_attempts` counts the first try, so at most `max_attempts - 1` delays are returned.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.current_attempt += 1;

        if self.current_attempt >= self.config.max_attempts {
            return None;
        }

        let exp = self.current_attempt as f64 - 1.0;
        let base_us = self.config.initial_backoff.as_micros() as f64;
        let backoff_us = base_us * self.config.backoff_multiplier.powf(exp);
        let max_us = self.config.max_backoff.as_micros() as f64;
        let capped_us = backoff_us.min(max_us).max(0.0);

        let jittered_us = if self.config.use_jitter {
            // Add jitter: random value between 50% and 100% of the calculated backoff
            let jitter = rand::random::<f64>() * 0.5 + 0.5;
            (capped_us * jitter) as u64
        } else {
            capped_us as u64
        };

        Some(Duration::from_micros(jittered_us))
    }
}
