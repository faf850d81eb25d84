//! Testing utilities for ledgerflow pipelines.
//!
//! This module provides:
//! - Scripted service clients and stages
//! - A harness wiring scripted clients into the workflow services
//! - Assertions over a finished pipeline context

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_payload_field, assert_stage_error_kind, assert_stage_status, assert_statuses,
};
pub use fixtures::{context_with, WorkflowHarness};
pub use mocks::{RecordedCall, ScriptedClient, ScriptedStage};
