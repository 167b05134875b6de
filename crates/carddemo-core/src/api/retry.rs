//! Retry eligibility and exponential backoff for gateway calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::ApiError;
use crate::config::RetryConfig;

/// Maximum number of retries after the first attempt.
pub const MAX_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Upper bound on a single backoff delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Jitter is drawn uniformly from `[0, JITTER_RATIO * delay]`.
const JITTER_RATIO: f64 = 0.1;

/// One scheduled retry, local to a single `with_retry` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub next_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Whether `error` may be retried as retry number `attempt` (1-based).
    ///
    /// 401 and 403 are never retried, whatever else holds.
    pub fn should_retry(&self, error: &ApiError, attempt: u32) -> bool {
        if error.is_unauthorized() || error.is_forbidden() {
            return false;
        }
        attempt <= self.max_retries && error.is_transient()
    }

    /// Backoff before retry `attempt` without jitter: `base * 2^(attempt-1)`, clamped.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, 0.0)
    }

    /// Backoff before retry `attempt`, with up to 10% random jitter, clamped to `[base, max]`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let fraction = rand::thread_rng().gen_range(0.0..=JITTER_RATIO);
        self.delay_with_jitter(attempt, fraction)
    }

    fn delay_with_jitter(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential = base_ms.saturating_mul(1_u64 << shift);
        let jitter = (exponential as f64 * jitter_fraction) as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let bounded = exponential.saturating_add(jitter).clamp(base_ms, max_ms);
        Duration::from_millis(bounded)
    }

    /// The retry to perform after `error`, or `None` if the error is terminal.
    pub fn schedule(&self, error: &ApiError, attempt: u32) -> Option<RetryAttempt> {
        self.should_retry(error, attempt).then(|| RetryAttempt {
            attempt,
            next_delay: self.retry_delay(attempt),
        })
    }

    /// Run `op`, retrying transient failures with backoff.
    ///
    /// Attempts are strictly sequential. Returns the first success, or the
    /// last error once it is terminal or retries are exhausted. State lives
    /// on this call's stack, so concurrent calls retry independently.
    pub async fn with_retry<T, F, Fut>(&self, mut op: F, context: &str) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut last_error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        for attempt in 1..=self.max_retries.saturating_add(1) {
            let Some(retry) = self.schedule(&last_error, attempt) else {
                debug!(context, attempt, error = %last_error, "Not retrying");
                return Err(last_error);
            };

            warn!(
                context,
                attempt = retry.attempt,
                delay_ms = retry.next_delay.as_millis() as u64,
                error = %last_error,
                "Transient failure, backing off"
            );
            tokio::time::sleep(retry.next_delay).await;

            match op().await {
                Ok(value) => {
                    debug!(context, attempt, "Retry succeeded");
                    return Ok(value);
                }
                Err(e) => last_error = e,
            }
        }

        Err(last_error)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            MAX_RETRIES,
            Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        )
    }
}
