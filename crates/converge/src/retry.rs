//! Retry logic with exponential backoff for host connections.

use crate::error::ConnectError;
use rand::Rng;
use std::thread;
use std::time::Duration;

/// Retry policy for transient connection failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Fraction of the delay randomized away (0.0 = none, 1.0 = full)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before retrying after attempt `attempt` (0-indexed), without
    /// jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// [`delay_for_attempt`](Self::delay_for_attempt) with up to `jitter` of
    /// it subtracted at random.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=1.0);
        delay.mul_f64(factor)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of attempts. `label` names the target in log messages.
pub fn with_retry<T, F>(config: &RetryConfig, label: &str, mut operation: F) -> Result<T, ConnectError>
where
    F: FnMut(u32) -> Result<T, ConnectError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation(attempt + 1) {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt + 1 >= max_attempts => {
                log::debug!("{label}: giving up after {max_attempts} attempt(s)");
                return Err(e);
            }
            Err(e) => {
                let delay = config.jittered_delay(attempt);
                log::info!(
                    "{label}: attempt {}/{max_attempts} failed: {e}. Retrying in {:.1}s...",
                    attempt + 1,
                    delay.as_secs_f64()
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
