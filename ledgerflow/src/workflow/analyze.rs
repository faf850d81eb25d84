use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::model::{BudgetAnalysis, TransactionSet};
use super::{to_payload, upstream, ANALYZE_BUDGET, CATEGORIZE_TRANSACTIONS};
use crate::context::PipelineContext;
use crate::errors::ErrorKind;
use crate::resilience::ResilientService;
use crate::stages::{ErrorDetail, Stage, StageResult};

#[derive(Debug, Deserialize)]
struct BudgetResponse {
    budget: BTreeMap<String, f64>,
}

/// Compares the week's categorized spend to the budget sheet and records the
/// week back to it.
///
/// Failing to record the week degrades the stage to `partial`; the analysis
/// itself is still usable downstream.
#[derive(Debug)]
pub struct AnalyzeBudget {
    spreadsheet: Arc<ResilientService>,
}

impl AnalyzeBudget {
    /// Creates the stage.
    #[must_use]
    pub fn new(spreadsheet: Arc<ResilientService>) -> Self {
        Self { spreadsheet }
    }
}

#[async_trait]
impl Stage for AnalyzeBudget {
    fn name(&self) -> &str {
        ANALYZE_BUDGET
    }

    async fn execute(&self, ctx: &PipelineContext) -> StageResult {
        let set: TransactionSet = match upstream(ctx, CATEGORIZE_TRANSACTIONS) {
            Ok(set) => set,
            Err(detail) => return StageResult::failed(ANALYZE_BUDGET, detail),
        };

        let budget = match self.spreadsheet.call("read_budget", json!({})).await {
            Ok(value) => match serde_json::from_value::<BudgetResponse>(value) {
                Ok(response) => response.budget,
                Err(e) => {
                    return StageResult::failed(
                        ANALYZE_BUDGET,
                        ErrorDetail::new(ErrorKind::Fatal, format!("malformed budget: {e}")),
                    )
                }
            },
            Err(err) => return StageResult::failed(ANALYZE_BUDGET, err.into()),
        };

        let mut analysis = BudgetAnalysis::compute(set.until, &budget, &set.transactions);
        info!(
            total_budget = analysis.total_budget,
            total_spent = analysis.total_spent,
            surplus = analysis.surplus,
            "Budget analysed"
        );

        let record = json!({
            "week_ending": analysis.week_ending,
            "lines": analysis.lines,
            "total_spent": analysis.total_spent,
            "surplus": analysis.surplus,
        });
        match self.spreadsheet.call("record_week", record).await {
            Ok(_) => {
                analysis.recorded = true;
                StageResult::success(ANALYZE_BUDGET, to_payload(&analysis))
            }
            Err(err) => {
                warn!(error = %err, "Week not recorded to spreadsheet");
                StageResult::partial(ANALYZE_BUDGET, to_payload(&analysis), err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageStatus;
    use crate::errors::ServiceError;
    use crate::testing::{context_with, WorkflowHarness};
    use crate::workflow::Transaction;
    use chrono::NaiveDate;

    fn categorized() -> StageResult {
        let day = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let tx = |id: &str, amount: f64, category: &str| Transaction {
            id: id.to_string(),
            date: day,
            description: id.to_string(),
            amount,
            category: Some(category.to_string()),
        };
        let set = TransactionSet {
            since: NaiveDate::from_ymd_opt(2026, 10, 11).unwrap(),
            until: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            transactions: vec![tx("a", -80.0, "groceries"), tx("b", -15.5, "transport")],
            uncategorized: 0,
        };
        StageResult::success(CATEGORIZE_TRANSACTIONS, to_payload(&set))
    }

    fn budget() -> serde_json::Value {
        json!({"budget": {"groceries": 100.0, "transport": 50.0}})
    }

    #[tokio::test]
    async fn test_analysis_recorded() {
        let harness = WorkflowHarness::new();
        harness.spreadsheet.push_response("read_budget", Ok(budget()));
        harness.spreadsheet.push_response("record_week", Ok(json!({"row": 42})));
        let stage = AnalyzeBudget::new(harness.services.spreadsheet.clone());

        let result = stage.execute(&context_with(vec![categorized()])).await;

        assert_eq!(result.status, StageStatus::Success);
        let analysis: BudgetAnalysis = serde_json::from_value(result.payload).unwrap();
        assert_eq!(analysis.surplus, 54.5);
        assert!(analysis.recorded);
        let written = harness.spreadsheet.last_params("record_week").unwrap();
        assert_eq!(written["week_ending"], "2026-10-18");
        assert_eq!(written["surplus"], 54.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_failure_degrades_to_partial() {
        let harness = WorkflowHarness::new();
        harness.spreadsheet.push_response("read_budget", Ok(budget()));
        harness.spreadsheet.push_response(
            "record_week",
            Err(ServiceError::fatal("spreadsheet", "sheet is read-only")),
        );
        let stage = AnalyzeBudget::new(harness.services.spreadsheet.clone());

        let result = stage.execute(&context_with(vec![categorized()])).await;

        assert_eq!(result.status, StageStatus::Partial);
        assert_eq!(result.error_kind(), Some(ErrorKind::Fatal));
        let analysis: BudgetAnalysis = serde_json::from_value(result.payload).unwrap();
        assert!(!analysis.recorded);
        assert_eq!(analysis.total_spent, 95.5);
    }

    #[tokio::test]
    async fn test_budget_read_failure_fails() {
        let harness = WorkflowHarness::new();
        harness.spreadsheet.push_response(
            "read_budget",
            Err(ServiceError::fatal("spreadsheet", "sheet not found")),
        );
        let stage = AnalyzeBudget::new(harness.services.spreadsheet.clone());

        let result = stage.execute(&context_with(vec![categorized()])).await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(harness.spreadsheet.calls_to("record_week"), 0);
    }
}
