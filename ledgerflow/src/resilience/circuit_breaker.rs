//! Per-service circuit breaker.
//!
//! ```text
//! closed    -> open       consecutive failures reach the threshold
//! open      -> half_open  cooldown elapsed; one probe admitted
//! half_open -> closed     probe succeeded
//! half_open -> open       probe failed; cooldown grows by the multiplier
//! ```
//!
//! State is process-local and lives for one job execution.

use crate::errors::CallError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Configuration shared by every breaker in a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Initial cooldown before a probe is admitted, in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Factor applied to the cooldown each time a probe fails.
    #[serde(default = "default_cooldown_multiplier")]
    pub cooldown_multiplier: f64,
    /// Upper bound for the grown cooldown, in milliseconds.
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    60_000
}

fn default_cooldown_multiplier() -> f64 {
    2.0
}

fn default_max_cooldown_ms() -> u64 {
    600_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            cooldown_multiplier: default_cooldown_multiplier(),
            max_cooldown_ms: default_max_cooldown_ms(),
        }
    }
}

impl BreakerConfig {
    /// Creates a breaker config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the initial cooldown.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = duration_to_ms(cooldown);
        self
    }

    /// Sets the cooldown multiplier.
    #[must_use]
    pub fn with_cooldown_multiplier(mut self, multiplier: f64) -> Self {
        self.cooldown_multiplier = multiplier;
        self
    }

    /// Sets the maximum cooldown.
    #[must_use]
    pub fn with_max_cooldown(mut self, max: Duration) -> Self {
        self.max_cooldown_ms = duration_to_ms(max);
        self
    }

    /// Gets the initial cooldown as a Duration.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Gets the maximum cooldown as a Duration.
    #[must_use]
    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }

    fn grow(&self, cooldown: Duration) -> Duration {
        if self.cooldown_multiplier <= 1.0 {
            return cooldown;
        }
        cooldown
            .mul_f64(self.cooldown_multiplier)
            .min(self.max_cooldown())
    }
}

pub(crate) fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Position of a breaker in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// A single probe call has been admitted.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of one service's breaker, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitState {
    /// Service name.
    pub service: String,
    /// Current state.
    pub state: BreakerState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// When the most recent failure was recorded.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// When the open circuit will admit a probe.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Cooldown applied on the next trip, in milliseconds.
    pub cooldown_ms: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    reopen_at: Option<Instant>,
    reopen_at_wall: Option<DateTime<Utc>>,
    cooldown: Duration,
}

/// Failure-window state machine guarding one external service.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for a service.
    #[must_use]
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        let cooldown = config.cooldown();
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                reopen_at: None,
                reopen_at_wall: None,
                cooldown,
            }),
        }
    }

    /// Returns the guarded service's name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the current state without advancing it.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Returns the number of failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Returns the cooldown the next trip will use.
    #[must_use]
    pub fn current_cooldown(&self) -> Duration {
        self.inner.lock().cooldown
    }

    /// Rejects while the breaker is open and its cooldown is still running.
    ///
    /// Unlike [`try_acquire`](Self::try_acquire) this never changes state, so
    /// it can guard preparatory work such as authentication.
    pub fn check(&self) -> Result<(), CallError> {
        let now = Instant::now();
        let inner = self.inner.lock();
        match (inner.state, inner.reopen_at) {
            (BreakerState::Open, Some(reopen_at)) if now < reopen_at => {
                Err(self.rejection(reopen_at - now))
            }
            _ => Ok(()),
        }
    }

    /// Asks whether a call may proceed now.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and admits
    /// exactly one probe; every other call made while open or half-open is
    /// rejected with [`CallError::CircuitOpen`].
    pub fn try_acquire(&self) -> Result<(), CallError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let reopen_at = inner.reopen_at.unwrap_or(now);
                if now >= reopen_at {
                    inner.state = BreakerState::HalfOpen;
                    info!(service = %self.service, "Circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(self.rejection(reopen_at - now))
                }
            }
            BreakerState::HalfOpen => Err(self.rejection(Duration::ZERO)),
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.reopen_at = None;
                inner.reopen_at_wall = None;
                inner.cooldown = self.config.cooldown();
                info!(service = %self.service, "Circuit closed after successful probe");
            }
            BreakerState::Open => {}
        }
    }

    /// Records a failed call, whatever its classification.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.trip(&mut inner, now);
                }
            }
            BreakerState::HalfOpen => {
                inner.consecutive_failures += 1;
                inner.cooldown = self.config.grow(inner.cooldown);
                self.trip(&mut inner, now);
            }
            BreakerState::Open => {}
        }
    }

    /// Returns a diagnostic snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CircuitState {
        let inner = self.inner.lock();
        CircuitState {
            service: self.service.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
            cooldown_until: inner.reopen_at_wall,
            cooldown_ms: duration_to_ms(inner.cooldown),
        }
    }

    fn trip(&self, inner: &mut BreakerInner, now: Instant) {
        inner.state = BreakerState::Open;
        inner.reopen_at = Some(now + inner.cooldown);
        inner.reopen_at_wall = chrono::Duration::from_std(inner.cooldown)
            .ok()
            .map(|d| Utc::now() + d);
        warn!(
            service = %self.service,
            consecutive_failures = inner.consecutive_failures,
            cooldown_ms = duration_to_ms(inner.cooldown),
            "Circuit opened"
        );
    }

    fn rejection(&self, retry_in: Duration) -> CallError {
        CallError::CircuitOpen {
            service: self.service.clone(),
            retry_in,
        }
    }
}

/// Lazily creates and holds one breaker per service for a run.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Returns the breaker for a service, creating it on first use.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service, self.config.clone())))
            .clone()
    }

    /// Returns the shared breaker configuration.
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns the number of breakers created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns true if no breaker has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Returns snapshots of every breaker, ordered by service name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CircuitState> {
        let mut states: Vec<CircuitState> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        states.sort_by(|a, b| a.service.cmp(&b.service));
        states
    }
}
