//! Error types for the ledgerflow engine.
//!
//! Failures are classified at the edge (the [`ServiceClient`] capability) into
//! four kinds that the retry policy and circuit breaker understand. Everything
//! above that layer works with [`CallError`], which adds the engine's own
//! outcomes: an open circuit and exhausted retries.
//!
//! [`ServiceClient`]: crate::services::ServiceClient

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for ledgerflow operations.
#[derive(Debug, Error)]
pub enum LedgerflowError {
    /// Configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A resilient call to an external service failed.
    #[error("{0}")]
    Call(#[from] CallError),

    /// A raw service failure outside the resilient wrapper.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classification of a failure, as recorded in a stage's error detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network blip or 5xx; retriable.
    Transient,
    /// The service asked us to slow down; retriable after its wait.
    RateLimited,
    /// Credentials were rejected.
    Authentication,
    /// Bad input, permission denied or malformed data; never retried.
    Fatal,
    /// The service's circuit breaker rejected the call.
    CircuitOpen,
    /// A retriable failure persisted past the attempt budget.
    RetriesExhausted,
    /// A previous stage failed and this one was not run.
    UpstreamFailed,
    /// A stage found the data it depends on missing or malformed.
    InvalidInput,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Authentication => write!(f, "authentication"),
            Self::Fatal => write!(f, "fatal"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::RetriesExhausted => write!(f, "retries_exhausted"),
            Self::UpstreamFailed => write!(f, "upstream_failed"),
            Self::InvalidInput => write!(f, "invalid_input"),
        }
    }
}

/// A failure reported by an external service through its capability contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Network blip, timeout or server-side error.
    #[error("transient failure from {service}: {message}")]
    Transient {
        /// Service that failed.
        service: String,
        /// Failure description.
        message: String,
    },

    /// The service throttled the request.
    #[error("rate limited by {service}: {message}")]
    RateLimited {
        /// Service that throttled.
        service: String,
        /// Failure description.
        message: String,
        /// Wait the service asked for, when it supplied one.
        retry_after: Option<Duration>,
    },

    /// Credentials were missing, expired or rejected.
    #[error("authentication failed for {service}: {message}")]
    Authentication {
        /// Service that rejected the credentials.
        service: String,
        /// Failure description.
        message: String,
    },

    /// Bad input, permission denied or malformed data.
    #[error("fatal error from {service}: {message}")]
    Fatal {
        /// Service that failed.
        service: String,
        /// Failure description.
        message: String,
    },
}

impl ServiceError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a rate-limit error with an optional suggested wait.
    #[must_use]
    pub fn rate_limited(
        service: impl Into<String>,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::RateLimited {
            service: service.into(),
            message: message.into(),
            retry_after,
        }
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn authentication(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } => ErrorKind::Transient,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    /// Returns the service that reported the error.
    #[must_use]
    pub fn service(&self) -> &str {
        match self {
            Self::Transient { service, .. }
            | Self::RateLimited { service, .. }
            | Self::Authentication { service, .. }
            | Self::Fatal { service, .. } => service,
        }
    }

    /// Returns the bare failure description.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. }
            | Self::RateLimited { message, .. }
            | Self::Authentication { message, .. }
            | Self::Fatal { message, .. } => message,
        }
    }

    /// Returns true for the kinds the default retry predicate accepts.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::RateLimited { .. })
    }

    /// Returns true if this is an authentication failure.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns the wait a rate-limited response asked for.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// The outcome of a failed resilient call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The service failed and the failure was not retried.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The circuit breaker rejected the call without invoking the service.
    #[error("circuit open for {service}; next probe in {}ms", retry_in.as_millis())]
    CircuitOpen {
        /// Service whose circuit is open.
        service: String,
        /// Time until the breaker will admit a probe.
        retry_in: Duration,
    },

    /// Every allowed attempt failed with a retriable error.
    #[error("retries exhausted for {service} after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Service that kept failing.
        service: String,
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last: ServiceError,
    },
}

impl CallError {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Service(err) => err.kind(),
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }

    /// Returns the service the call was aimed at.
    #[must_use]
    pub fn service(&self) -> &str {
        match self {
            Self::Service(err) => err.service(),
            Self::CircuitOpen { service, .. } | Self::RetriesExhausted { service, .. } => service,
        }
    }

    /// Returns the underlying service error, if one was observed.
    #[must_use]
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(err) | Self::RetriesExhausted { last: err, .. } => Some(err),
            Self::CircuitOpen { .. } => None,
        }
    }

    /// Returns true when the failure reflects the service being unavailable
    /// rather than the request being wrong.
    #[must_use]
    pub fn is_availability(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient
                | ErrorKind::RateLimited
                | ErrorKind::CircuitOpen
                | ErrorKind::RetriesExhausted
        )
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON for the expected shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range or missing.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
