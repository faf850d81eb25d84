//! Scripted service clients and stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::PipelineContext;
use crate::core::StageStatus;
use crate::errors::ServiceError;
use crate::services::{ServiceClient, Token};
use crate::stages::{ErrorDetail, Stage, StageResult};

/// One call observed by a [`ScriptedClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Operation name.
    pub operation: String,
    /// Parameters passed.
    pub params: serde_json::Value,
    /// Token value presented.
    pub token: String,
}

/// A service client that replays scripted responses.
///
/// Responses are queued per operation and consumed in order. Once a queue is
/// empty, the operation's fallback (if any) is returned on every call.
/// Unscripted operations fail with a `Fatal` error. Authentication succeeds
/// with a distinct token per call unless a result is queued with
/// [`with_auth_result`](Self::with_auth_result).
#[derive(Debug)]
pub struct ScriptedClient {
    service: String,
    token_ttl: Duration,
    auth_script: Mutex<VecDeque<Result<Token, ServiceError>>>,
    responses: Mutex<HashMap<String, VecDeque<Result<serde_json::Value, ServiceError>>>>,
    fallbacks: Mutex<HashMap<String, Result<serde_json::Value, ServiceError>>>,
    auth_calls: AtomicUsize,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedClient {
    /// Creates a client for `service` with no scripted operations.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            token_ttl: Duration::from_secs(3600),
            auth_script: Mutex::new(VecDeque::new()),
            responses: Mutex::new(HashMap::new()),
            fallbacks: Mutex::new(HashMap::new()),
            auth_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the validity reported for issued tokens.
    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Queues the result of the next `authenticate()` call.
    #[must_use]
    pub fn with_auth_result(self, result: Result<Token, ServiceError>) -> Self {
        self.auth_script.lock().push_back(result);
        self
    }

    /// Queues one response for `operation`.
    #[must_use]
    pub fn respond(
        self,
        operation: impl Into<String>,
        result: Result<serde_json::Value, ServiceError>,
    ) -> Self {
        self.push_response(operation, result);
        self
    }

    /// Sets the response returned for `operation` once its queue is empty.
    #[must_use]
    pub fn respond_always(
        self,
        operation: impl Into<String>,
        result: Result<serde_json::Value, ServiceError>,
    ) -> Self {
        self.set_fallback(operation, result);
        self
    }

    /// Sets the fallback response for `operation` on a shared client.
    pub fn set_fallback(
        &self,
        operation: impl Into<String>,
        result: Result<serde_json::Value, ServiceError>,
    ) {
        self.fallbacks.lock().insert(operation.into(), result);
    }

    /// Queues one response for `operation` on a shared client.
    pub fn push_response(
        &self,
        operation: impl Into<String>,
        result: Result<serde_json::Value, ServiceError>,
    ) {
        self.responses
            .lock()
            .entry(operation.into())
            .or_default()
            .push_back(result);
    }

    /// Returns how many times `authenticate()` was called.
    #[must_use]
    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    /// Returns how many times `operation` was called.
    #[must_use]
    pub fn calls_to(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Returns the total number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns every recorded call in order.
    #[must_use]
    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the parameters of the most recent call to `operation`.
    #[must_use]
    pub fn last_params(&self, operation: &str) -> Option<serde_json::Value> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|call| call.operation == operation)
            .map(|call| call.params.clone())
    }
}

#[async_trait]
impl ServiceClient for ScriptedClient {
    fn service(&self) -> &str {
        &self.service
    }

    async fn authenticate(&self) -> Result<Token, ServiceError> {
        let n = self.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.auth_script.lock().pop_front() {
            Some(result) => result,
            None => Ok(Token::new(
                format!("{}-token-{n}", self.service),
                self.token_ttl,
            )),
        }
    }

    async fn call(
        &self,
        token: &Token,
        operation: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError> {
        self.calls.lock().push(RecordedCall {
            operation: operation.to_string(),
            params: params.clone(),
            token: token.value().to_string(),
        });

        let queued = self
            .responses
            .lock()
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        if let Some(result) = queued {
            return result;
        }
        if let Some(result) = self.fallbacks.lock().get(operation) {
            return result.clone();
        }
        Err(ServiceError::fatal(
            self.service.clone(),
            format!("unscripted operation '{operation}'"),
        ))
    }
}

/// A stage that returns a fixed result and records what it saw.
#[derive(Debug)]
pub struct ScriptedStage {
    name: String,
    result: StageResult,
    tolerant: bool,
    call_count: AtomicUsize,
    seen: Mutex<Vec<Option<StageStatus>>>,
}

impl ScriptedStage {
    /// Creates a stage that returns `result`.
    #[must_use]
    pub fn new(name: impl Into<String>, result: StageResult) -> Self {
        Self {
            name: name.into(),
            result,
            tolerant: false,
            call_count: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Creates a stage that succeeds with a null payload.
    #[must_use]
    pub fn succeeding(name: impl Into<String>) -> Self {
        let name = name.into();
        let result = StageResult::success(name.clone(), serde_json::Value::Null);
        Self::new(name, result)
    }

    /// Creates a stage that fails with `detail`.
    #[must_use]
    pub fn failing(name: impl Into<String>, detail: ErrorDetail) -> Self {
        let name = name.into();
        let result = StageResult::failed(name.clone(), detail);
        Self::new(name, result)
    }

    /// Creates a stage that completes partially.
    #[must_use]
    pub fn partial(name: impl Into<String>, detail: ErrorDetail) -> Self {
        let name = name.into();
        let result = StageResult::partial(name.clone(), serde_json::Value::Null, detail);
        Self::new(name, result)
    }

    /// Marks the stage as running after an upstream failure.
    #[must_use]
    pub fn continuing_on_upstream_failure(mut self) -> Self {
        self.tolerant = true;
        self
    }

    /// Returns the number of times the stage ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Returns the status of the preceding result at each invocation.
    #[must_use]
    pub fn previous_statuses(&self) -> Vec<Option<StageStatus>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn continues_on_upstream_failure(&self) -> bool {
        self.tolerant
    }

    async fn execute(&self, ctx: &PipelineContext) -> StageResult {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(ctx.last().map(|result| result.status));
        self.result.clone()
    }
}
