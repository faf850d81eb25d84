//! Retry with exponential backoff and multiplicative jitter.
//!
//! Each attempt is gated by the service's [`CircuitBreaker`]; a rejected
//! attempt fails fast and does not use up an attempt.

use super::circuit_breaker::{duration_to_ms, CircuitBreaker};
use crate::errors::{CallError, ServiceError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Growth factor applied per attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Lower bound of the random jitter factor.
    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,
    /// Upper bound of the random jitter factor.
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
    /// Cap on any computed delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter_min() -> f64 {
    0.8
}

fn default_jitter_max() -> f64 {
    1.2
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = duration_to_ms(delay);
        self
    }

    /// Sets the backoff factor.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Sets the jitter range; `(1.0, 1.0)` disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, min: f64, max: f64) -> Self {
        self.jitter_min = min;
        self.jitter_max = max;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = duration_to_ms(delay);
        self
    }

    /// Gets the base delay as a Duration.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Gets the maximum delay as a Duration.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// One scheduled retry, kept only long enough to log it.
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    /// Wait before the next attempt.
    pub delay: Duration,
    /// The failure that triggered the retry.
    pub error: &'a ServiceError,
}

/// Wraps operations in retry-with-backoff.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a policy from a config.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the policy's configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns a copy of this policy limited to `attempts` attempts.
    #[must_use]
    pub fn with_max_attempts(&self, attempts: u32) -> Self {
        Self::new(self.config.clone().with_max_attempts(attempts))
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter.
    ///
    /// `base_delay * backoff_factor^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.config.base_delay_ms as f64 * self.config.backoff_factor.powi(exponent);
        let capped = millis.min(self.config.max_delay_ms as f64).max(0.0);
        Duration::from_secs_f64(capped / 1000.0)
    }

    /// Delay after failed attempt `attempt`, scaled by a uniform random factor
    /// in `[jitter_min, jitter_max]` and capped at `max_delay`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        let (lo, hi) = (self.config.jitter_min, self.config.jitter_max);
        let factor = if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        nominal.mul_f64(factor.max(0.0)).min(self.config.max_delay())
    }

    /// Runs `operation` until it succeeds, fails with an error `is_retriable`
    /// rejects, or uses up `max_attempts`.
    ///
    /// Before every attempt the breaker is consulted; if it refuses, this
    /// returns [`CallError::CircuitOpen`] without calling the operation. Each
    /// outcome is reported back to the breaker. A rate-limit error carrying a
    /// suggested wait uses that wait instead of the computed backoff.
    pub async fn execute<T, F, Fut, P>(
        &self,
        breaker: &CircuitBreaker,
        is_retriable: P,
        mut operation: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
        P: Fn(&ServiceError) -> bool,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            breaker.try_acquire()?;
            attempt += 1;

            let err = match operation().await {
                Ok(value) => {
                    breaker.record_success();
                    if attempt > 1 {
                        debug!(service = %breaker.service(), attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };
            breaker.record_failure();

            if !is_retriable(&err) {
                return Err(CallError::Service(err));
            }
            if attempt >= max_attempts {
                warn!(
                    service = %breaker.service(),
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(CallError::RetriesExhausted {
                    service: breaker.service().to_string(),
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = err
                .retry_after()
                .unwrap_or_else(|| self.backoff_delay(attempt));
            let retry = RetryAttempt {
                attempt,
                delay,
                error: &err,
            };
            warn!(
                service = %breaker.service(),
                attempt = retry.attempt,
                delay_ms = duration_to_ms(retry.delay),
                error = %retry.error,
                "Retrying after error"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// The default retry predicate: transient and rate-limited failures.
pub fn default_retriable(err: &ServiceError) -> bool {
    err.is_retriable()
}
