use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::model::{Transaction, TransactionSet, UNCATEGORIZED};
use super::{to_payload, upstream, CATEGORIZE_TRANSACTIONS, RETRIEVE_TRANSACTIONS};
use crate::context::PipelineContext;
use crate::errors::ErrorKind;
use crate::resilience::ResilientService;
use crate::stages::{ErrorDetail, Stage, StageResult};

#[derive(Debug, Deserialize)]
struct CategorizeResponse {
    categories: Vec<String>,
}

/// Labels each transaction with a spending category.
///
/// Transactions are sent to the classifier in batches. A batch that cannot be
/// classified is marked [`UNCATEGORIZED`] and the stage degrades to `partial`;
/// the stage fails only when no batch succeeds.
#[derive(Debug)]
pub struct CategorizeTransactions {
    generative_ai: Arc<ResilientService>,
    batch_size: usize,
}

impl CategorizeTransactions {
    /// Creates the stage.
    #[must_use]
    pub fn new(generative_ai: Arc<ResilientService>, batch_size: usize) -> Self {
        Self {
            generative_ai,
            batch_size: batch_size.max(1),
        }
    }

    async fn classify(&self, batch: &[Transaction]) -> Result<Vec<String>, ErrorDetail> {
        let items: Vec<serde_json::Value> = batch
            .iter()
            .map(|tx| json!({"id": tx.id, "description": tx.description, "amount": tx.amount}))
            .collect();

        let response = self
            .generative_ai
            .call("categorize", json!({"transactions": items}))
            .await?;

        let parsed: CategorizeResponse = serde_json::from_value(response).map_err(|e| {
            ErrorDetail::new(ErrorKind::Fatal, format!("malformed categorize response: {e}"))
        })?;
        if parsed.categories.len() != batch.len() {
            return Err(ErrorDetail::new(
                ErrorKind::Fatal,
                format!(
                    "classifier returned {} categories for {} transactions",
                    parsed.categories.len(),
                    batch.len()
                ),
            ));
        }
        Ok(parsed.categories)
    }
}

#[async_trait]
impl Stage for CategorizeTransactions {
    fn name(&self) -> &str {
        CATEGORIZE_TRANSACTIONS
    }

    async fn execute(&self, ctx: &PipelineContext) -> StageResult {
        let mut set: TransactionSet = match upstream(ctx, RETRIEVE_TRANSACTIONS) {
            Ok(set) => set,
            Err(detail) => return StageResult::failed(CATEGORIZE_TRANSACTIONS, detail),
        };
        if set.transactions.is_empty() {
            return StageResult::success(CATEGORIZE_TRANSACTIONS, to_payload(&set));
        }

        let total_batches = set.transactions.len().div_ceil(self.batch_size);
        let mut failed_batches = 0;
        let mut last_error: Option<ErrorDetail> = None;

        for (index, batch) in set.transactions.chunks_mut(self.batch_size).enumerate() {
            match self.classify(batch).await {
                Ok(categories) => {
                    for (tx, category) in batch.iter_mut().zip(categories) {
                        tx.category = Some(category);
                    }
                }
                Err(detail) => {
                    warn!(batch = index, size = batch.len(), error = %detail, "Batch left uncategorized");
                    for tx in batch.iter_mut() {
                        tx.category = Some(UNCATEGORIZED.to_string());
                    }
                    failed_batches += 1;
                    last_error = Some(detail);
                }
            }
        }

        set.uncategorized = set
            .transactions
            .iter()
            .filter(|tx| tx.category_or_default() == UNCATEGORIZED)
            .count();
        info!(
            batches = total_batches,
            failed_batches,
            uncategorized = set.uncategorized,
            "Transactions categorized"
        );

        match last_error {
            None => StageResult::success(CATEGORIZE_TRANSACTIONS, to_payload(&set)),
            Some(detail) if failed_batches == total_batches => {
                StageResult::failed(CATEGORIZE_TRANSACTIONS, detail)
            }
            Some(detail) => StageResult::partial(
                CATEGORIZE_TRANSACTIONS,
                to_payload(&set),
                ErrorDetail::new(
                    detail.kind,
                    format!(
                        "{failed_batches} of {total_batches} batches uncategorized; last error: {}",
                        detail.message
                    ),
                ),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageStatus;
    use crate::errors::ServiceError;
    use crate::testing::{context_with, WorkflowHarness};
    use chrono::NaiveDate;

    fn retrieved(count: usize) -> StageResult {
        let day = NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
        let transactions = (0..count)
            .map(|i| Transaction {
                id: format!("t{i}"),
                date: day,
                description: format!("purchase {i}"),
                amount: -10.0,
                category: None,
            })
            .collect();
        let set = TransactionSet {
            since: day,
            until: day,
            transactions,
            uncategorized: 0,
        };
        StageResult::success(RETRIEVE_TRANSACTIONS, to_payload(&set))
    }

    fn categories(n: usize, label: &str) -> serde_json::Value {
        json!({"categories": vec![label; n]})
    }

    #[tokio::test]
    async fn test_all_batches_classified() {
        let harness = WorkflowHarness::new();
        harness.generative_ai.push_response("categorize", Ok(categories(2, "groceries")));
        harness.generative_ai.push_response("categorize", Ok(categories(1, "transport")));
        let stage = CategorizeTransactions::new(harness.services.generative_ai.clone(), 2);

        let result = stage.execute(&context_with(vec![retrieved(3)])).await;

        assert_eq!(result.status, StageStatus::Success);
        let set: TransactionSet = serde_json::from_value(result.payload).unwrap();
        let labels: Vec<&str> = set.transactions.iter().map(Transaction::category_or_default).collect();
        assert_eq!(labels, vec!["groceries", "groceries", "transport"]);
        assert_eq!(set.uncategorized, 0);
        assert_eq!(harness.generative_ai.calls_to("categorize"), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_degrades_to_partial() {
        let harness = WorkflowHarness::new();
        harness.generative_ai.push_response("categorize", Ok(categories(2, "dining")));
        harness.generative_ai.push_response(
            "categorize",
            Err(ServiceError::fatal("generative_ai", "content filtered")),
        );
        let stage = CategorizeTransactions::new(harness.services.generative_ai.clone(), 2);

        let result = stage.execute(&context_with(vec![retrieved(4)])).await;

        assert_eq!(result.status, StageStatus::Partial);
        assert_eq!(result.error_kind(), Some(ErrorKind::Fatal));
        let set: TransactionSet = serde_json::from_value(result.payload).unwrap();
        assert_eq!(set.uncategorized, 2);
        assert_eq!(set.transactions[3].category_or_default(), UNCATEGORIZED);
    }

    #[tokio::test]
    async fn test_every_batch_failing_fails_the_stage() {
        let harness = WorkflowHarness::new();
        harness
            .generative_ai
            .push_response("categorize", Ok(json!({"categories": ["only-one"]})));
        let stage = CategorizeTransactions::new(harness.services.generative_ai.clone(), 5);

        let result = stage.execute(&context_with(vec![retrieved(3)])).await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error_kind(), Some(ErrorKind::Fatal));
    }

    #[tokio::test]
    async fn test_no_transactions_needs_no_calls() {
        let harness = WorkflowHarness::new();
        let stage = CategorizeTransactions::new(harness.services.generative_ai.clone(), 5);

        let result = stage.execute(&context_with(vec![retrieved(0)])).await;

        assert!(result.is_success());
        assert_eq!(harness.generative_ai.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_upstream_is_invalid_input() {
        let harness = WorkflowHarness::new();
        let stage = CategorizeTransactions::new(harness.services.generative_ai.clone(), 5);

        let result = stage.execute(&PipelineContext::new()).await;

        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidInput));
    }
}
