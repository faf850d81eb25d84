//! The append-only record of one pipeline execution.

use crate::core::RunStatus;
use crate::stages::StageResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Accumulated results of the stages executed so far in one run.
///
/// Stages receive a shared reference and can only read it. The orchestrator is
/// the sole writer, and it only ever appends: a recorded result is never
/// changed or removed.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineContext {
    execution_id: Uuid,
    started_at: DateTime<Utc>,
    results: Vec<StageResult>,
}

impl PipelineContext {
    /// Creates an empty context with a fresh execution ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_execution_id(Uuid::new_v4())
    }

    /// Creates an empty context with a specific execution ID.
    #[must_use]
    pub fn with_execution_id(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            started_at: Utc::now(),
            results: Vec::new(),
        }
    }

    /// Returns the execution ID.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Returns when the run started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns every recorded result in execution order.
    #[must_use]
    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    /// Returns the most recently recorded result.
    #[must_use]
    pub fn last(&self) -> Option<&StageResult> {
        self.results.last()
    }

    /// Returns the result recorded for a stage.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.name == stage)
    }

    /// Returns a stage's payload if that stage produced a usable result.
    #[must_use]
    pub fn usable_payload(&self, stage: &str) -> Option<&serde_json::Value> {
        self.get(stage)
            .filter(|r| r.is_usable())
            .map(|r| &r.payload)
    }

    /// Returns the number of recorded results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Returns the results that did not fully succeed.
    pub fn problems(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// Folds the recorded results into the run's final status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        RunStatus::from_stages(self.results.iter().map(|r| r.status))
    }

    pub(crate) fn record(&mut self, result: StageResult) {
        self.results.push(result);
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}
