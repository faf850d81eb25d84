//! Pipeline execution.
//!
//! This module provides:
//! - The sequential [`StageOrchestrator`]
//! - The end-of-run [`RunReport`]
//! - Idempotency keys for side-effecting stages

mod idempotency;
mod orchestrator;
mod report;

pub use idempotency::idempotency_key;
pub use orchestrator::StageOrchestrator;
pub use report::{RunReport, StageSummary};
