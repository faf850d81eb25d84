//! Resilience primitives shared by every stage.
//!
//! This module provides:
//! - Retry with exponential backoff and jitter
//! - Per-service circuit breakers
//! - A short-lived authentication token cache
//! - [`ResilientService`], which composes the three around a client
//!
//! The cache and breaker registry are constructed once per run and injected
//! into each [`ResilientService`]; nothing here is global.

mod auth;
mod circuit_breaker;
mod retry;
mod service;

pub use auth::{AuthConfig, AuthTokenCache, CachedToken, MAX_TOKEN_LIFETIME};
pub use circuit_breaker::{
    BreakerConfig, BreakerState, CircuitBreaker, CircuitBreakerRegistry, CircuitState,
};
pub use retry::{default_retriable, RetryAttempt, RetryConfig, RetryPolicy};
pub use service::ResilientService;
