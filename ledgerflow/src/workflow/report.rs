use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::model::{BudgetAnalysis, Insight, TransactionSet};
use super::{upstream, ANALYZE_BUDGET, GENERATE_INSIGHT, RETRIEVE_TRANSACTIONS, SEND_REPORT};
use crate::context::PipelineContext;
use crate::resilience::ResilientService;
use crate::stages::{ErrorDetail, Stage, StageResult};

/// Emails the weekly report.
///
/// Runs even after an upstream failure so the recipient hears about it; the
/// body then lists which stages did not succeed.
#[derive(Debug)]
pub struct SendReport {
    mail: Arc<ResilientService>,
    recipient: String,
}

impl SendReport {
    /// Creates the stage.
    #[must_use]
    pub fn new(mail: Arc<ResilientService>, recipient: impl Into<String>) -> Self {
        Self {
            mail,
            recipient: recipient.into(),
        }
    }
}

/// Builds the subject line for the run so far.
#[must_use]
pub fn report_subject(ctx: &PipelineContext) -> String {
    let week_ending = upstream::<TransactionSet>(ctx, RETRIEVE_TRANSACTIONS)
        .map_or_else(|_| ctx.started_at().date_naive(), |set| set.until);
    format!("Weekly finance report, week ending {week_ending} ({})", ctx.status())
}

/// Builds the plain-text report body from everything recorded so far.
#[must_use]
pub fn report_body(ctx: &PipelineContext) -> String {
    let mut lines = Vec::new();

    if let Ok(insight) = upstream::<Insight>(ctx, GENERATE_INSIGHT) {
        lines.push(insight.text);
        lines.push(String::new());
    }

    match upstream::<BudgetAnalysis>(ctx, ANALYZE_BUDGET) {
        Ok(analysis) => {
            lines.push(format!("Budget, week ending {}:", analysis.week_ending));
            for line in &analysis.lines {
                lines.push(format!(
                    "  {:<16} spent {:>9.2} of {:>9.2}  ({:+.2})",
                    line.category, line.spent, line.budget, line.variance
                ));
            }
            lines.push(format!(
                "  {:<16} spent {:>9.2} of {:>9.2}  surplus {:.2}",
                "total", analysis.total_spent, analysis.total_budget, analysis.surplus
            ));
        }
        Err(_) => lines.push("No budget analysis is available for this run.".to_string()),
    }

    let problems: Vec<String> = ctx
        .problems()
        .map(|result| match &result.error {
            Some(error) => format!("  {}: {} ({error})", result.name, result.status),
            None => format!("  {}: {}", result.name, result.status),
        })
        .collect();
    if !problems.is_empty() {
        lines.push(String::new());
        lines.push("Stages that did not fully succeed:".to_string());
        lines.extend(problems);
    }

    lines.push(String::new());
    lines.push(format!("Execution {}", ctx.execution_id()));
    lines.join("\n")
}

#[async_trait]
impl Stage for SendReport {
    fn name(&self) -> &str {
        SEND_REPORT
    }

    fn continues_on_upstream_failure(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &PipelineContext) -> StageResult {
        if self.recipient.trim().is_empty() {
            return StageResult::failed(
                SEND_REPORT,
                ErrorDetail::invalid_input("no report recipient configured"),
            );
        }

        let subject = report_subject(ctx);
        let message = json!({
            "to": self.recipient,
            "subject": subject,
            "body": report_body(ctx),
            "execution_id": ctx.execution_id(),
        });

        match self.mail.call("send_report", message).await {
            Ok(delivery) => {
                info!(recipient = %self.recipient, "Report sent");
                StageResult::success(
                    SEND_REPORT,
                    json!({"recipient": self.recipient, "subject": subject, "delivery": delivery}),
                )
            }
            Err(err) => StageResult::failed(SEND_REPORT, err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageStatus;
    use crate::errors::{ErrorKind, ServiceError};
    use crate::testing::{context_with, WorkflowHarness};
    use crate::workflow::{to_payload, CATEGORIZE_TRANSACTIONS};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn analysis() -> BudgetAnalysis {
        let budget: BTreeMap<String, f64> = [("groceries".to_string(), 100.0)].into_iter().collect();
        BudgetAnalysis::compute(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(), &budget, &[])
    }

    #[test]
    fn test_body_lists_budget_insight_and_problems() {
        let ctx = context_with(vec![
            StageResult::success(ANALYZE_BUDGET, to_payload(&analysis())),
            StageResult::partial(
                GENERATE_INSIGHT,
                to_payload(&Insight {
                    text: "Local summary.".to_string(),
                    generated: false,
                }),
                ErrorDetail::new(ErrorKind::CircuitOpen, "generative_ai circuit open"),
            ),
        ]);

        let body = report_body(&ctx);

        assert!(body.starts_with("Local summary."));
        assert!(body.contains("Budget, week ending 2026-10-18:"));
        assert!(body.contains("groceries"));
        assert!(body.contains("surplus 100.00"));
        assert!(body.contains("generate_insight: partial (circuit_open: generative_ai circuit open)"));
        assert!(body.ends_with(&ctx.execution_id().to_string()));
    }

    #[test]
    fn test_body_without_analysis() {
        let ctx = context_with(vec![StageResult::failed(
            CATEGORIZE_TRANSACTIONS,
            ErrorDetail::new(ErrorKind::RetriesExhausted, "gave up"),
        )]);

        let body = report_body(&ctx);

        assert!(body.contains("No budget analysis is available"));
        assert!(body.contains("categorize_transactions: failed"));
    }

    #[tokio::test]
    async fn test_sends_report() {
        let harness = WorkflowHarness::new();
        harness.mail.push_response("send_report", Ok(json!({"message_id": "m-1"})));
        let stage = SendReport::new(harness.services.mail.clone(), "me@example.com");
        let ctx = context_with(vec![StageResult::success(ANALYZE_BUDGET, to_payload(&analysis()))]);

        let result = stage.execute(&ctx).await;

        assert_eq!(result.status, StageStatus::Success);
        assert_eq!(result.payload["delivery"]["message_id"], "m-1");
        let sent = harness.mail.last_params("send_report").unwrap();
        assert_eq!(sent["to"], "me@example.com");
        assert!(sent["subject"].as_str().unwrap().ends_with("(success)"));
    }

    #[tokio::test]
    async fn test_missing_recipient_fails_without_calling() {
        let harness = WorkflowHarness::new();
        let stage = SendReport::new(harness.services.mail.clone(), "");

        let result = stage.execute(&PipelineContext::new()).await;

        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidInput));
        assert_eq!(harness.mail.call_count(), 0);
    }

    #[tokio::test]
    async fn test_mail_failure_fails() {
        let harness = WorkflowHarness::new();
        harness.mail.push_response(
            "send_report",
            Err(ServiceError::fatal("mail", "mailbox unavailable")),
        );
        let stage = SendReport::new(harness.services.mail.clone(), "me@example.com");

        let result = stage.execute(&PipelineContext::new()).await;

        assert_eq!(result.status, StageStatus::Failed);
    }
}
