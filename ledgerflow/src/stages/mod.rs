//! Stage trait and result types.
//!
//! Stages are the fundamental units of work in a ledgerflow pipeline. Each one
//! reads the results recorded so far and returns its own [`StageResult`].

mod result;

pub use result::{ErrorDetail, StageResult};

use crate::context::PipelineContext;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Whether the stage still runs when the stage immediately before it
    /// failed.
    ///
    /// Defaults to `false`: a failure halts the pipeline and every later stage
    /// is recorded as skipped.
    fn continues_on_upstream_failure(&self) -> bool {
        false
    }

    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The results recorded by earlier stages
    ///
    /// # Returns
    ///
    /// The stage result. Failures are reported through the result's status,
    /// never by panicking.
    async fn execute(&self, ctx: &PipelineContext) -> StageResult;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&PipelineContext) -> StageResult + Send + Sync,
{
    name: String,
    tolerant: bool,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&PipelineContext) -> StageResult + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            tolerant: false,
            func,
        }
    }

    /// Marks the stage as running even after an upstream failure.
    #[must_use]
    pub fn continuing_on_upstream_failure(mut self) -> Self {
        self.tolerant = true;
        self
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&PipelineContext) -> StageResult + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("tolerant", &self.tolerant)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&PipelineContext) -> StageResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn continues_on_upstream_failure(&self) -> bool {
        self.tolerant
    }

    async fn execute(&self, ctx: &PipelineContext) -> StageResult {
        (self.func)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("test", |ctx| {
            StageResult::success("test", serde_json::json!({"seen": ctx.len()}))
        });

        assert_eq!(stage.name(), "test");
        assert!(!stage.continues_on_upstream_failure());

        let ctx = PipelineContext::new();
        let result = stage.execute(&ctx).await;
        assert!(result.is_success());
        assert_eq!(result.payload["seen"], 0);
    }

    #[test]
    fn test_fn_stage_tolerance_flag() {
        let stage = FnStage::new("report", |_| {
            StageResult::success("report", serde_json::Value::Null)
        })
        .continuing_on_upstream_failure();

        assert!(stage.continues_on_upstream_failure());
    }
}
