//! Test assertions for pipeline runs.

use crate::context::PipelineContext;
use crate::core::StageStatus;
use crate::errors::ErrorKind;
use crate::stages::StageResult;

fn result<'a>(ctx: &'a PipelineContext, stage: &str) -> &'a StageResult {
    match ctx.get(stage) {
        Some(result) => result,
        None => panic!(
            "Expected a result for stage '{}', recorded: {:?}",
            stage,
            ctx.results().iter().map(|r| r.name.as_str()).collect::<Vec<_>>()
        ),
    }
}

/// Asserts that the stage recorded the expected status.
pub fn assert_stage_status(ctx: &PipelineContext, stage: &str, expected: StageStatus) {
    let actual = result(ctx, stage).status;
    assert_eq!(
        actual, expected,
        "Expected stage '{}' to be {:?}, got {:?}",
        stage, expected, actual
    );
}

/// Asserts the status of every recorded result, in order.
pub fn assert_statuses(ctx: &PipelineContext, expected: &[StageStatus]) {
    let actual: Vec<StageStatus> = ctx.results().iter().map(|r| r.status).collect();
    assert_eq!(actual, expected, "Unexpected stage statuses");
}

/// Asserts that the stage's error detail carries the expected kind.
pub fn assert_stage_error_kind(ctx: &PipelineContext, stage: &str, expected: ErrorKind) {
    let actual = result(ctx, stage).error_kind();
    assert_eq!(
        actual,
        Some(expected),
        "Expected stage '{}' to carry error kind {:?}, got {:?}",
        stage,
        expected,
        actual
    );
}

/// Asserts that the stage's payload has `key` and returns its value.
pub fn assert_payload_field<'a>(
    ctx: &'a PipelineContext,
    stage: &str,
    key: &str,
) -> &'a serde_json::Value {
    let payload = &result(ctx, stage).payload;
    match payload.get(key) {
        Some(value) => value,
        None => panic!(
            "Expected payload of stage '{}' to contain key '{}', got {}",
            stage, key, payload
        ),
    }
}
