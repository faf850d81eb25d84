//! Core domain model types for ledgerflow.
//!
//! This module contains the status enums shared by stages, the orchestrator
//! and the run report.

mod status;

pub use status::{RunStatus, StageStatus};
