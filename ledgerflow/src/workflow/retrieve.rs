use async_trait::async_trait;
use chrono::Days;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::model::{Transaction, TransactionSet};
use super::{to_payload, RETRIEVE_TRANSACTIONS};
use crate::context::PipelineContext;
use crate::errors::ErrorKind;
use crate::resilience::ResilientService;
use crate::stages::{ErrorDetail, Stage, StageResult};

#[derive(Debug, Deserialize)]
struct ListResponse {
    transactions: Vec<Transaction>,
}

/// Pulls the reporting window's transactions from the bank.
///
/// The window ends on the run's start date and covers `lookback_days`.
#[derive(Debug)]
pub struct RetrieveTransactions {
    banking: Arc<ResilientService>,
    lookback_days: u32,
}

impl RetrieveTransactions {
    /// Creates the stage.
    #[must_use]
    pub fn new(banking: Arc<ResilientService>, lookback_days: u32) -> Self {
        Self {
            banking,
            lookback_days,
        }
    }
}

#[async_trait]
impl Stage for RetrieveTransactions {
    fn name(&self) -> &str {
        RETRIEVE_TRANSACTIONS
    }

    async fn execute(&self, ctx: &PipelineContext) -> StageResult {
        let until = ctx.started_at().date_naive();
        let since = until
            .checked_sub_days(Days::new(u64::from(self.lookback_days)))
            .unwrap_or(until);

        let response = match self
            .banking
            .call("list_transactions", json!({"since": since, "until": until}))
            .await
        {
            Ok(value) => value,
            Err(err) => return StageResult::failed(RETRIEVE_TRANSACTIONS, err.into()),
        };

        let transactions = match serde_json::from_value::<ListResponse>(response) {
            Ok(list) => list.transactions,
            Err(e) => {
                return StageResult::failed(
                    RETRIEVE_TRANSACTIONS,
                    ErrorDetail::new(
                        ErrorKind::Fatal,
                        format!("malformed list_transactions response: {e}"),
                    ),
                )
            }
        };

        info!(count = transactions.len(), %since, %until, "Transactions retrieved");
        let set = TransactionSet {
            since,
            until,
            transactions,
            uncategorized: 0,
        };
        StageResult::success(RETRIEVE_TRANSACTIONS, to_payload(&set))
    }
}
