//! Sequential stage orchestrator.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

use crate::context::PipelineContext;
use crate::core::{RunStatus, StageStatus};
use crate::observability::RunTimer;
use crate::stages::{ErrorDetail, Stage, StageResult};

/// Runs stages one after another over a single [`PipelineContext`].
///
/// A `failed` result halts the run unless the next stage declares
/// [`Stage::continues_on_upstream_failure`]. Once halted, every remaining
/// stage is recorded as `skipped` with an `upstream_failed` detail naming the
/// stage that failed. The orchestrator never retries a stage.
#[derive(Debug, Clone)]
pub struct StageOrchestrator {
    name: String,
}

impl StageOrchestrator {
    /// Creates an orchestrator; `name` labels the run's logs.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `stages` in order over a fresh context.
    pub async fn run(&self, stages: &[Arc<dyn Stage>]) -> PipelineContext {
        self.run_with_context(stages, PipelineContext::new()).await
    }

    /// Runs `stages` in order, appending to `ctx`.
    pub async fn run_with_context(
        &self,
        stages: &[Arc<dyn Stage>],
        mut ctx: PipelineContext,
    ) -> PipelineContext {
        let span = info_span!(
            "pipeline",
            pipeline = %self.name,
            execution_id = %ctx.execution_id()
        );

        async move {
            info!(stages = stages.len(), "Pipeline started");
            let mut timer = RunTimer::start(self.name.clone());
            let mut halted_by: Option<String> = None;

            for stage in stages {
                let name = stage.name();

                if halted_by.is_none() {
                    if let Some(previous) = ctx.last().filter(|r| r.is_failure()) {
                        if stage.continues_on_upstream_failure() {
                            info!(
                                stage = %name,
                                upstream = %previous.name,
                                "Stage continues after upstream failure"
                            );
                        } else {
                            warn!(
                                stage = %name,
                                upstream = %previous.name,
                                "Halting pipeline after stage failure"
                            );
                            halted_by = Some(previous.name.clone());
                        }
                    }
                }

                if let Some(failed) = &halted_by {
                    let now = Utc::now();
                    let result =
                        StageResult::skipped(name, ErrorDetail::upstream_failed(failed))
                            .with_timing(now, now);
                    info!(stage = %name, status = %StageStatus::Skipped, "Stage skipped");
                    ctx.record(result);
                    timer.stage_skipped();
                    continue;
                }

                let result = run_stage(stage.as_ref(), &ctx).await;
                ctx.record(result);
                timer.stage_executed();
            }

            let status = ctx.status();
            let timing = timer.finish();
            let elapsed_ms = timing.elapsed_ms();
            let (executed, skipped) = (timing.executed, timing.skipped);
            match status {
                RunStatus::Failed => {
                    warn!(%status, elapsed_ms, executed, skipped, "Pipeline finished");
                }
                _ => info!(%status, elapsed_ms, executed, skipped, "Pipeline finished"),
            }
            ctx
        }
        .instrument(span)
        .await
    }
}

impl Default for StageOrchestrator {
    fn default() -> Self {
        Self::new("ledgerflow")
    }
}

async fn run_stage(stage: &dyn Stage, ctx: &PipelineContext) -> StageResult {
    let name = stage.name();
    let span = info_span!("stage", stage = %name);

    async move {
        info!("Stage started");
        let started_at = Utc::now();
        let mut result = stage.execute(ctx).await;
        let ended_at = Utc::now();

        if result.name != name {
            warn!(reported = %result.name, "Stage result renamed to stage name");
            result.name = name.to_string();
        }
        let result = result.with_timing(started_at, ended_at);

        match &result.error {
            Some(error) if result.is_failure() => warn!(
                status = %result.status,
                elapsed_ms = result.elapsed_ms,
                error = %error,
                "Stage finished"
            ),
            Some(error) => info!(
                status = %result.status,
                elapsed_ms = result.elapsed_ms,
                error = %error,
                "Stage finished"
            ),
            None => info!(
                status = %result.status,
                elapsed_ms = result.elapsed_ms,
                "Stage finished"
            ),
        }
        result
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::stages::FnStage;
    use crate::testing::{assert_stage_error_kind, assert_statuses, ScriptedStage};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fatal(msg: &str) -> ErrorDetail {
        ErrorDetail::new(ErrorKind::Fatal, msg)
    }

    #[tokio::test]
    async fn test_all_stages_run_in_order() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(FnStage::new("a", |ctx| {
                StageResult::success("a", json!({"seen": ctx.len()}))
            })),
            Arc::new(FnStage::new("b", |ctx| {
                StageResult::success("b", json!({"seen": ctx.len()}))
            })),
        ];

        let ctx = StageOrchestrator::default().run(&stages).await;

        assert_statuses(&ctx, &[StageStatus::Success, StageStatus::Success]);
        assert_eq!(ctx.results()[0].payload, json!({"seen": 0}));
        assert_eq!(ctx.results()[1].payload, json!({"seen": 1}));
        assert_eq!(ctx.status(), RunStatus::Success);
    }

    #[tokio::test]
    async fn test_failure_halts_and_skips_remaining() {
        let after = Arc::new(ScriptedStage::succeeding("after"));
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ScriptedStage::failing("broken", fatal("boom"))),
            after.clone(),
            Arc::new(ScriptedStage::succeeding("last")),
        ];

        let ctx = StageOrchestrator::default().run(&stages).await;

        assert_statuses(
            &ctx,
            &[StageStatus::Failed, StageStatus::Skipped, StageStatus::Skipped],
        );
        assert_eq!(after.call_count(), 0);
        assert_stage_error_kind(&ctx, "last", ErrorKind::UpstreamFailed);
        assert_eq!(
            ctx.get("last").and_then(|r| r.error.as_ref()).map(|e| e.message.as_str()),
            Some("not run: upstream stage 'broken' failed")
        );
        assert_eq!(ctx.status(), RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_tolerant_stage_runs_after_failure() {
        let tolerant = Arc::new(ScriptedStage::succeeding("notify").continuing_on_upstream_failure());
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ScriptedStage::failing("broken", fatal("boom"))),
            tolerant.clone(),
        ];

        let ctx = StageOrchestrator::default().run(&stages).await;

        assert_statuses(&ctx, &[StageStatus::Failed, StageStatus::Success]);
        assert_eq!(tolerant.previous_statuses(), vec![Some(StageStatus::Failed)]);
    }

    #[tokio::test]
    async fn test_tolerant_stage_after_halt_is_skipped() {
        let tolerant = Arc::new(ScriptedStage::succeeding("notify").continuing_on_upstream_failure());
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ScriptedStage::failing("broken", fatal("boom"))),
            Arc::new(ScriptedStage::succeeding("strict")),
            tolerant.clone(),
        ];

        let ctx = StageOrchestrator::default().run(&stages).await;

        assert_statuses(
            &ctx,
            &[StageStatus::Failed, StageStatus::Skipped, StageStatus::Skipped],
        );
        assert_eq!(tolerant.call_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_and_skipped_results_continue() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ScriptedStage::partial(
                "degraded",
                ErrorDetail::new(ErrorKind::Transient, "one batch lost"),
            )),
            Arc::new(ScriptedStage::new(
                "optional",
                StageResult::skipped("optional", ErrorDetail::invalid_input("nothing to do")),
            )),
            Arc::new(ScriptedStage::succeeding("final")),
        ];

        let ctx = StageOrchestrator::default().run(&stages).await;

        assert_statuses(
            &ctx,
            &[StageStatus::Partial, StageStatus::Skipped, StageStatus::Success],
        );
        assert_eq!(ctx.status(), RunStatus::Partial);
    }

    #[tokio::test]
    async fn test_result_name_is_normalised() {
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(FnStage::new("actual", |_| {
            StageResult::success("misreported", json!(null))
        }))];

        let ctx = StageOrchestrator::default().run(&stages).await;

        assert_eq!(ctx.results()[0].name, "actual");
    }

    #[tokio::test]
    async fn test_results_are_timed() {
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(ScriptedStage::succeeding("a"))];

        let ctx = StageOrchestrator::default().run(&stages).await;
        let result = &ctx.results()[0];

        let (Some(start), Some(end)) = (result.started_at, result.ended_at) else {
            panic!("Expected timing on result");
        };
        assert!(start <= end);
        assert!(result.elapsed_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_run_with_context_keeps_execution_id() {
        let ctx = PipelineContext::new();
        let id = ctx.execution_id();
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(ScriptedStage::succeeding("a"))];

        let ctx = StageOrchestrator::new("weekly").run_with_context(&stages, ctx).await;

        assert_eq!(ctx.execution_id(), id);
        assert_eq!(ctx.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_pipeline_succeeds() {
        let ctx = StageOrchestrator::default().run(&[]).await;

        assert!(ctx.is_empty());
        assert_eq!(ctx.status(), RunStatus::Success);
    }
}
