use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::model::{BudgetAnalysis, Insight};
use super::{to_payload, upstream, ANALYZE_BUDGET, GENERATE_INSIGHT};
use crate::context::PipelineContext;
use crate::errors::ErrorKind;
use crate::resilience::ResilientService;
use crate::stages::{ErrorDetail, Stage, StageResult};

#[derive(Debug, Deserialize)]
struct InsightResponse {
    insight: String,
}

/// Asks the generative-AI service for a narrative about the week.
///
/// When the service is unavailable the stage falls back to a locally built
/// summary and reports `partial`. Without a usable analysis it is skipped.
#[derive(Debug)]
pub struct GenerateInsight {
    generative_ai: Arc<ResilientService>,
}

impl GenerateInsight {
    /// Creates the stage.
    #[must_use]
    pub fn new(generative_ai: Arc<ResilientService>) -> Self {
        Self { generative_ai }
    }
}

#[async_trait]
impl Stage for GenerateInsight {
    fn name(&self) -> &str {
        GENERATE_INSIGHT
    }

    // Skips itself when the analysis is missing, so the report still goes out.
    fn continues_on_upstream_failure(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &PipelineContext) -> StageResult {
        let analysis: BudgetAnalysis = match upstream(ctx, ANALYZE_BUDGET) {
            Ok(analysis) => analysis,
            Err(detail) => return StageResult::skipped(GENERATE_INSIGHT, detail),
        };

        let outcome = self
            .generative_ai
            .call("generate_insight", to_payload(&analysis))
            .await;

        match outcome {
            Ok(value) => match serde_json::from_value::<InsightResponse>(value) {
                Ok(response) => {
                    info!(chars = response.insight.len(), "Insight generated");
                    let insight = Insight {
                        text: response.insight,
                        generated: true,
                    };
                    StageResult::success(GENERATE_INSIGHT, to_payload(&insight))
                }
                Err(e) => StageResult::failed(
                    GENERATE_INSIGHT,
                    ErrorDetail::new(ErrorKind::Fatal, format!("malformed insight: {e}")),
                ),
            },
            Err(err) if err.is_availability() => {
                warn!(error = %err, "Insight unavailable, using local summary");
                let insight = Insight {
                    text: analysis.summary(),
                    generated: false,
                };
                StageResult::partial(GENERATE_INSIGHT, to_payload(&insight), err.into())
            }
            Err(err) => StageResult::failed(GENERATE_INSIGHT, err.into()),
        }
    }
}
