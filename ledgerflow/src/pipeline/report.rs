//! End-of-run summary for the job log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::PipelineContext;
use crate::core::{RunStatus, StageStatus};
use crate::errors::LedgerflowError;
use crate::resilience::CircuitState;
use crate::stages::{ErrorDetail, StageResult};

/// One stage's line in a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    /// Stage name.
    pub name: String,
    /// Final status.
    pub status: StageStatus,
    /// Elapsed time in milliseconds.
    pub elapsed_ms: f64,
    /// Error detail when the stage did not fully succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl From<&StageResult> for StageSummary {
    fn from(result: &StageResult) -> Self {
        Self {
            name: result.name.clone(),
            status: result.status,
            elapsed_ms: result.elapsed_ms,
            error: result.error.clone(),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Execution identifier.
    pub execution_id: Uuid,
    /// Final run status.
    pub status: RunStatus,
    /// Run start time.
    pub started_at: DateTime<Utc>,
    /// Time the report was built.
    pub finished_at: DateTime<Utc>,
    /// Per-stage outcomes, in execution order.
    pub stages: Vec<StageSummary>,
    /// Breaker state per service at the end of the run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub circuits: Vec<CircuitState>,
}

impl RunReport {
    /// Builds a report from a finished context.
    #[must_use]
    pub fn from_context(ctx: &PipelineContext) -> Self {
        Self {
            execution_id: ctx.execution_id(),
            status: ctx.status(),
            started_at: ctx.started_at(),
            finished_at: Utc::now(),
            stages: ctx.results().iter().map(StageSummary::from).collect(),
            circuits: Vec::new(),
        }
    }

    /// Attaches breaker snapshots.
    #[must_use]
    pub fn with_circuits(mut self, circuits: Vec<CircuitState>) -> Self {
        self.circuits = circuits;
        self
    }

    /// Returns true if the run failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    /// Serializes the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, LedgerflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
