//! Short-lived authentication token cache.
//!
//! One token per service, held for its reported validity. The cache never
//! retries: an `authenticate()` failure reaches the caller unchanged.

use super::circuit_breaker::duration_to_ms;
use crate::errors::ServiceError;
use crate::services::{ServiceClient, Token};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Longest validity the cache will honour; longer reported lifetimes are
/// clamped to it.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration for the token cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Treat tokens as expired this many seconds before their reported expiry.
    #[serde(default)]
    pub refresh_skew_seconds: u64,
}

impl AuthConfig {
    /// Gets the refresh skew as a Duration.
    #[must_use]
    pub fn refresh_skew(&self) -> Duration {
        Duration::from_secs(self.refresh_skew_seconds)
    }
}

/// A token held by the cache together with its expiry.
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// Service the token belongs to.
    pub service: String,
    /// The credential.
    pub token: Token,
    /// Absolute expiry on the monotonic clock.
    pub expires_at: Instant,
    /// Wall-clock issue time, for diagnostics.
    pub issued_at: DateTime<Utc>,
}

impl CachedToken {
    fn new(service: &str, token: Token) -> Self {
        let expires_at = Instant::now() + token.expires_in().min(MAX_TOKEN_LIFETIME);
        Self {
            service: service.to_string(),
            token,
            expires_at,
            issued_at: Utc::now(),
        }
    }

    /// Returns true if the token is still usable at `now`, given `skew`.
    #[must_use]
    pub fn is_fresh(&self, now: Instant, skew: Duration) -> bool {
        now.checked_add(skew).is_some_and(|deadline| deadline < self.expires_at)
    }
}

/// Per-run cache of service credentials.
#[derive(Debug, Default)]
pub struct AuthTokenCache {
    config: AuthConfig,
    tokens: DashMap<String, CachedToken>,
}

impl AuthTokenCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            tokens: DashMap::new(),
        }
    }

    /// Returns a valid token for the client's service, authenticating only
    /// when there is no cached token or it has expired.
    pub async fn get_token(&self, client: &dyn ServiceClient) -> Result<Token, ServiceError> {
        let service = client.service();

        if let Some(token) = self.fresh(service) {
            debug!(service = %service, "Using cached token");
            return Ok(token);
        }

        let token = client.authenticate().await?;
        info!(
            service = %service,
            expires_in_ms = duration_to_ms(token.expires_in()),
            "Authenticated"
        );
        self.tokens
            .insert(service.to_string(), CachedToken::new(service, token.clone()));
        Ok(token)
    }

    /// Drops the cached token so the next `get_token` re-authenticates.
    pub fn invalidate(&self, service: &str) {
        if self.tokens.remove(service).is_some() {
            debug!(service = %service, "Invalidated cached token");
        }
    }

    /// Returns the cached entry without authenticating, fresh or not.
    #[must_use]
    pub fn cached(&self, service: &str) -> Option<CachedToken> {
        self.tokens.get(service).map(|entry| entry.value().clone())
    }

    /// Returns the number of cached tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn fresh(&self, service: &str) -> Option<Token> {
        let now = Instant::now();
        let skew = self.config.refresh_skew();
        self.tokens
            .get(service)
            .filter(|entry| entry.is_fresh(now, skew))
            .map(|entry| entry.token.clone())
    }
}
