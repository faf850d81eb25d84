//! Stage result types recorded in the pipeline context.

use crate::core::StageStatus;
use crate::errors::{CallError, ErrorKind, ServiceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a stage did not fully succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable description for operators.
    pub message: String,
}

impl ErrorDetail {
    /// Creates a new error detail.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Detail for a stage that depends on data another stage did not produce.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Detail for a stage skipped because `failed_stage` failed.
    #[must_use]
    pub fn upstream_failed(failed_stage: &str) -> Self {
        Self::new(
            ErrorKind::UpstreamFailed,
            format!("not run: upstream stage '{failed_stage}' failed"),
        )
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&CallError> for ErrorDetail {
    fn from(err: &CallError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<CallError> for ErrorDetail {
    fn from(err: CallError) -> Self {
        Self::from(&err)
    }
}

impl From<&ServiceError> for ErrorDetail {
    fn from(err: &ServiceError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// The result a stage hands back to the orchestrator.
///
/// The payload is opaque to the orchestrator; later stages interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub name: String,
    /// Stage status.
    pub status: StageStatus,
    /// Result data.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Error detail when the status is not success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// When the stage started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Wall time spent in the stage, in milliseconds.
    #[serde(default)]
    pub elapsed_ms: f64,
}

impl StageResult {
    fn new(
        name: impl Into<String>,
        status: StageStatus,
        payload: serde_json::Value,
        error: Option<ErrorDetail>,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            payload,
            error,
            started_at: None,
            ended_at: None,
            elapsed_ms: 0.0,
        }
    }

    /// Creates a successful result.
    #[must_use]
    pub fn success(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(name, StageStatus::Success, payload, None)
    }

    /// Creates a degraded result that still carries a usable payload.
    #[must_use]
    pub fn partial(
        name: impl Into<String>,
        payload: serde_json::Value,
        error: ErrorDetail,
    ) -> Self {
        Self::new(name, StageStatus::Partial, payload, Some(error))
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(name: impl Into<String>, error: ErrorDetail) -> Self {
        Self::new(name, StageStatus::Failed, serde_json::Value::Null, Some(error))
    }

    /// Creates a skipped result.
    #[must_use]
    pub fn skipped(name: impl Into<String>, reason: ErrorDetail) -> Self {
        Self::new(name, StageStatus::Skipped, serde_json::Value::Null, Some(reason))
    }

    /// Stamps the execution window onto the result.
    #[must_use]
    pub fn with_timing(mut self, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        self.elapsed_ms = duration_ms(started_at, ended_at);
        self.started_at = Some(started_at);
        self.ended_at = Some(ended_at);
        self
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, StageStatus::Success)
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Returns true if downstream stages may use the payload.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.status.is_usable()
    }

    /// Returns the error kind, if any.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[allow(clippy::cast_precision_loss)]
fn duration_ms(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> f64 {
    (ended_at - started_at)
        .num_microseconds()
        .map_or(0.0, |us| us as f64 / 1000.0)
}
