//! External service capability contract.
//!
//! Every external dependency (banking, spreadsheet, generative AI, mail) is
//! reached through [`ServiceClient`]. The engine never sees wire details; it
//! only sees tokens, JSON values and classified [`ServiceError`]s.

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::{classify_status, parse_retry_after, HttpServiceClient};

use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The four external services the weekly workflow talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Transaction source and transfer executor.
    Banking,
    /// Budget source and weekly ledger.
    Spreadsheet,
    /// Transaction classifier and narrative writer.
    GenerativeAi,
    /// Report delivery.
    Mail,
}

impl ServiceKind {
    /// All services, in a stable order.
    pub const ALL: [Self; 4] = [
        Self::Banking,
        Self::Spreadsheet,
        Self::GenerativeAi,
        Self::Mail,
    ];

    /// Returns the canonical service name used in logs and breaker keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Banking => "banking",
            Self::Spreadsheet => "spreadsheet",
            Self::GenerativeAi => "generative_ai",
            Self::Mail => "mail",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque credential issued by a service.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    expires_in: Duration,
}

impl Token {
    /// Creates a token valid for `expires_in` from now.
    #[must_use]
    pub fn new(value: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            value: value.into(),
            expires_in,
        }
    }

    /// Returns the credential value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the validity the service reported when issuing the token.
    #[must_use]
    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Capability interface every external client implements.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Returns the service name used for token caching and circuit breaking.
    fn service(&self) -> &str;

    /// Obtains a fresh credential.
    ///
    /// Must be idempotent and safe to call repeatedly.
    async fn authenticate(&self) -> Result<Token, ServiceError>;

    /// Invokes an operation with the given credential and parameters.
    async fn call(
        &self,
        token: &Token,
        operation: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError>;
}
