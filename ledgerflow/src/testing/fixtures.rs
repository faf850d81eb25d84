//! Test fixtures for stage and pipeline testing.

use std::sync::Arc;
use std::time::Duration;

use super::mocks::ScriptedClient;
use crate::context::PipelineContext;
use crate::resilience::{
    AuthTokenCache, BreakerConfig, CircuitBreakerRegistry, ResilientService, RetryConfig,
    RetryPolicy,
};
use crate::services::ServiceKind;
use crate::stages::StageResult;
use crate::workflow::WorkflowServices;

/// Builds a context that already holds `results`, in order.
#[must_use]
pub fn context_with(results: Vec<StageResult>) -> PipelineContext {
    let mut ctx = PipelineContext::new();
    for result in results {
        ctx.record(result);
    }
    ctx
}

/// Four scripted clients wired into a full set of workflow services.
///
/// The clients are shared with the services, so responses can be queued with
/// [`ScriptedClient::push_response`] after construction.
#[derive(Debug)]
pub struct WorkflowHarness {
    /// Scripted banking client.
    pub banking: Arc<ScriptedClient>,
    /// Scripted spreadsheet client.
    pub spreadsheet: Arc<ScriptedClient>,
    /// Scripted generative-AI client.
    pub generative_ai: Arc<ScriptedClient>,
    /// Scripted mail client.
    pub mail: Arc<ScriptedClient>,
    /// Token cache shared by the services.
    pub tokens: Arc<AuthTokenCache>,
    /// Breaker registry shared by the services.
    pub breakers: Arc<CircuitBreakerRegistry>,
    /// The wrapped services.
    pub services: WorkflowServices,
}

impl WorkflowHarness {
    /// Creates a harness with default breakers and 10ms base backoff.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(
            RetryConfig::new().with_base_delay(Duration::from_millis(10)),
            BreakerConfig::default(),
        )
    }

    /// Creates a harness with explicit retry and breaker settings.
    #[must_use]
    pub fn with_config(retry: RetryConfig, breaker: BreakerConfig) -> Self {
        let tokens = Arc::new(AuthTokenCache::default());
        let breakers = Arc::new(CircuitBreakerRegistry::new(breaker));
        let banking = Arc::new(ScriptedClient::new(ServiceKind::Banking.as_str()));
        let spreadsheet = Arc::new(ScriptedClient::new(ServiceKind::Spreadsheet.as_str()));
        let generative_ai = Arc::new(ScriptedClient::new(ServiceKind::GenerativeAi.as_str()));
        let mail = Arc::new(ScriptedClient::new(ServiceKind::Mail.as_str()));

        let wrap = |client: &Arc<ScriptedClient>| {
            Arc::new(ResilientService::new(
                Arc::clone(client) as _,
                Arc::clone(&tokens),
                &breakers,
                RetryPolicy::new(retry.clone()),
            ))
        };
        let services = WorkflowServices {
            banking: wrap(&banking),
            spreadsheet: wrap(&spreadsheet),
            generative_ai: wrap(&generative_ai),
            mail: wrap(&mail),
        };

        Self {
            banking,
            spreadsheet,
            generative_ai,
            mail,
            tokens,
            breakers,
            services,
        }
    }
}

impl Default for WorkflowHarness {
    fn default() -> Self {
        Self::new()
    }
}
