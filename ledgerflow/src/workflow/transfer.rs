use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::model::BudgetAnalysis;
use super::{upstream, ANALYZE_BUDGET, TRANSFER_SURPLUS};
use crate::config::WorkflowConfig;
use crate::context::PipelineContext;
use crate::pipeline::idempotency_key;
use crate::resilience::ResilientService;
use crate::stages::{ErrorDetail, Stage, StageResult};

/// Moves the week's surplus to the savings account.
///
/// Money only moves after a fully successful analysis. The transfer carries
/// an idempotency reference derived from the account, the week and the
/// amount, so a re-run for the same week cannot move money twice.
#[derive(Debug)]
pub struct TransferSurplus {
    banking: Arc<ResilientService>,
    savings_account: Option<String>,
    min_amount: f64,
    dry_run: bool,
}

impl TransferSurplus {
    /// Creates the stage.
    #[must_use]
    pub fn new(banking: Arc<ResilientService>, config: &WorkflowConfig) -> Self {
        Self {
            banking,
            savings_account: config.savings_account.clone(),
            min_amount: config.min_transfer_amount,
            dry_run: config.dry_run_transfers,
        }
    }
}

#[async_trait]
impl Stage for TransferSurplus {
    fn name(&self) -> &str {
        TRANSFER_SURPLUS
    }

    async fn execute(&self, ctx: &PipelineContext) -> StageResult {
        let analysis: BudgetAnalysis = match upstream(ctx, ANALYZE_BUDGET) {
            Ok(analysis) => analysis,
            Err(detail) => return StageResult::skipped(TRANSFER_SURPLUS, detail),
        };
        if !ctx.get(ANALYZE_BUDGET).is_some_and(StageResult::is_success) {
            return StageResult::skipped(
                TRANSFER_SURPLUS,
                ErrorDetail::invalid_input("budget analysis only partially completed"),
            );
        }
        let Some(account) = self.savings_account.as_deref() else {
            return StageResult::skipped(
                TRANSFER_SURPLUS,
                ErrorDetail::invalid_input("no savings account configured"),
            );
        };

        let amount = analysis.surplus;
        if amount < self.min_amount || amount <= 0.0 {
            info!(amount, min_amount = self.min_amount, "Surplus below minimum, no transfer");
            return StageResult::success(
                TRANSFER_SURPLUS,
                json!({
                    "executed": false,
                    "amount": amount,
                    "reason": "surplus below minimum transfer amount",
                }),
            );
        }

        let week = analysis.week_ending.to_string();
        let formatted = format!("{amount:.2}");
        let reference = idempotency_key(&[account, &week, &formatted]);

        if self.dry_run {
            info!(amount, to_account = %account, %reference, "Dry run, transfer not executed");
            return StageResult::success(
                TRANSFER_SURPLUS,
                json!({
                    "executed": false,
                    "dry_run": true,
                    "amount": amount,
                    "to_account": account,
                    "reference": reference,
                }),
            );
        }

        let request = json!({
            "to_account": account,
            "amount": amount,
            "reference": reference,
        });
        match self.banking.call("transfer", request).await {
            Ok(confirmation) => {
                info!(amount, to_account = %account, "Surplus transferred");
                StageResult::success(
                    TRANSFER_SURPLUS,
                    json!({
                        "executed": true,
                        "amount": amount,
                        "to_account": account,
                        "reference": reference,
                        "confirmation": confirmation,
                    }),
                )
            }
            Err(err) => StageResult::failed(TRANSFER_SURPLUS, err.into()),
        }
    }
}
