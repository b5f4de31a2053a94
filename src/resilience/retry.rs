//! Bounded retry with fixed or exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tracing::debug;

use crate::consts::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::error::ProviderError;

#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same pause before every retry.
    Fixed(Duration),
    /// `initial * multiplier^n`, capped at `max`. With `jitter` the pause is
    /// drawn uniformly between half and all of that.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Fixed(DEFAULT_RETRY_DELAY),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Pause before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
                jitter,
            } => {
                let exp = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
                let base = (initial.as_secs_f64() * multiplier.powi(exp)).min(max.as_secs_f64());
                let secs = if *jitter {
                    let mut rng = rand::rng();
                    let factor: f64 = rng.random();
                    base / 2.0 + base / 2.0 * factor
                } else {
                    base
                };
                Duration::from_secs_f64(secs.max(0.0))
            }
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// `op` receives the 1-based attempt number. The last error is returned.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, ?delay, error = %err, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
