//! The weekly personal-finance workflow.
//!
//! Six stages in a fixed order: retrieve transactions, categorize them,
//! analyze spend against the budget, generate a narrative, send the report,
//! and transfer any surplus to savings. Each stage reaches external services
//! only through a [`ResilientService`].

mod analyze;
mod categorize;
mod insight;
mod model;
mod report;
mod retrieve;
mod transfer;

pub use analyze::AnalyzeBudget;
pub use categorize::CategorizeTransactions;
pub use insight::GenerateInsight;
pub use model::{
    round_cents, BudgetAnalysis, CategoryLine, Insight, Transaction, TransactionSet,
    UNCATEGORIZED,
};
pub use report::{report_body, report_subject, SendReport};
pub use retrieve::RetrieveTransactions;
pub use transfer::TransferSurplus;

use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::config::WorkflowConfig;
use crate::context::PipelineContext;
use crate::resilience::ResilientService;
use crate::services::ServiceKind;
use crate::stages::{ErrorDetail, Stage};

/// Stage name of [`RetrieveTransactions`].
pub const RETRIEVE_TRANSACTIONS: &str = "retrieve_transactions";
/// Stage name of [`CategorizeTransactions`].
pub const CATEGORIZE_TRANSACTIONS: &str = "categorize_transactions";
/// Stage name of [`AnalyzeBudget`].
pub const ANALYZE_BUDGET: &str = "analyze_budget";
/// Stage name of [`GenerateInsight`].
pub const GENERATE_INSIGHT: &str = "generate_insight";
/// Stage name of [`SendReport`].
pub const SEND_REPORT: &str = "send_report";
/// Stage name of [`TransferSurplus`].
pub const TRANSFER_SURPLUS: &str = "transfer_surplus";

/// The resilient service handles the workflow needs.
#[derive(Debug, Clone)]
pub struct WorkflowServices {
    /// Transactions and transfers.
    pub banking: Arc<ResilientService>,
    /// Budget and weekly ledger.
    pub spreadsheet: Arc<ResilientService>,
    /// Classification and narrative.
    pub generative_ai: Arc<ResilientService>,
    /// Report delivery.
    pub mail: Arc<ResilientService>,
}

impl WorkflowServices {
    /// Builds every handle with `wrap`, stopping at the first error.
    pub fn try_build<E, F>(mut wrap: F) -> Result<Self, E>
    where
        F: FnMut(ServiceKind) -> Result<Arc<ResilientService>, E>,
    {
        Ok(Self {
            banking: wrap(ServiceKind::Banking)?,
            spreadsheet: wrap(ServiceKind::Spreadsheet)?,
            generative_ai: wrap(ServiceKind::GenerativeAi)?,
            mail: wrap(ServiceKind::Mail)?,
        })
    }
}

/// Returns the six stages of the weekly run, in order.
#[must_use]
pub fn weekly_pipeline(services: &WorkflowServices, config: &WorkflowConfig) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(RetrieveTransactions::new(
            Arc::clone(&services.banking),
            config.lookback_days,
        )),
        Arc::new(CategorizeTransactions::new(
            Arc::clone(&services.generative_ai),
            config.categorize_batch_size,
        )),
        Arc::new(AnalyzeBudget::new(Arc::clone(&services.spreadsheet))),
        Arc::new(GenerateInsight::new(Arc::clone(&services.generative_ai))),
        Arc::new(SendReport::new(
            Arc::clone(&services.mail),
            config.report_recipient.clone(),
        )),
        Arc::new(TransferSurplus::new(Arc::clone(&services.banking), config)),
    ]
}

/// Decodes the payload an earlier stage produced.
///
/// A failed or skipped upstream result yields an `upstream_failed` detail; a
/// missing or undecodable one yields `invalid_input`.
fn upstream<T: DeserializeOwned>(ctx: &PipelineContext, stage: &str) -> Result<T, ErrorDetail> {
    let result = ctx
        .get(stage)
        .ok_or_else(|| ErrorDetail::invalid_input(format!("no result from stage '{stage}'")))?;
    if !result.is_usable() {
        return Err(ErrorDetail::upstream_failed(stage));
    }
    serde_json::from_value(result.payload.clone()).map_err(|e| {
        ErrorDetail::invalid_input(format!("unreadable payload from stage '{stage}': {e}"))
    })
}

fn to_payload<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
