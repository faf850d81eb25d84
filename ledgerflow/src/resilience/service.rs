//! A service client wrapped in the run's resilience machinery.

use super::auth::AuthTokenCache;
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
use super::retry::{default_retriable, RetryPolicy};
use crate::errors::CallError;
use crate::services::{ServiceClient, Token};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// The only way stages reach an external service.
///
/// Every call obtains a token from the shared cache, runs through the retry
/// policy, and is gated by the service's breaker. A rejected credential is
/// handled once: the token is invalidated, a new one is obtained, and one more
/// attempt is made before the failure propagates.
pub struct ResilientService {
    client: Arc<dyn ServiceClient>,
    tokens: Arc<AuthTokenCache>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl ResilientService {
    /// Binds a client to the run's token cache and breaker registry.
    #[must_use]
    pub fn new(
        client: Arc<dyn ServiceClient>,
        tokens: Arc<AuthTokenCache>,
        breakers: &CircuitBreakerRegistry,
        retry: RetryPolicy,
    ) -> Self {
        let breaker = breakers.get(client.service());
        Self {
            client,
            tokens,
            breaker,
            retry,
        }
    }

    /// Returns the service name.
    #[must_use]
    pub fn service(&self) -> &str {
        self.client.service()
    }

    /// Returns the service's breaker.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Returns the retry policy applied to calls.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Calls an operation on the service.
    pub async fn call(
        &self,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, CallError> {
        debug!(service = %self.service(), operation, "Calling service");
        let token = self.token().await?;

        match self.attempt(&self.retry, &token, operation, &params).await {
            Err(CallError::Service(err)) if err.is_authentication() => {
                warn!(
                    service = %self.service(),
                    operation,
                    error = %err,
                    "Credentials rejected, re-authenticating"
                );
                self.tokens.invalidate(self.service());
                let token = self.token().await?;
                self.attempt(&self.retry.with_max_attempts(1), &token, operation, &params)
                    .await
            }
            other => other,
        }
    }

    // Authentication goes to the same service, so it is gated by the breaker
    // and its failures count toward it.
    async fn token(&self) -> Result<Token, CallError> {
        self.breaker.check()?;
        self.tokens
            .get_token(self.client.as_ref())
            .await
            .map_err(|err| {
                self.breaker.record_failure();
                CallError::Service(err)
            })
    }

    async fn attempt(
        &self,
        policy: &RetryPolicy,
        token: &Token,
        operation: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, CallError> {
        policy
            .execute(&self.breaker, default_retriable, || {
                self.client.call(token, operation, params)
            })
            .await
    }
}

impl fmt::Debug for ResilientService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientService")
            .field("service", &self.service())
            .field("breaker", &self.breaker.state())
            .field("retry", self.retry.config())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, ServiceError};
    use crate::resilience::{BreakerConfig, BreakerState, RetryConfig};
    use crate::testing::ScriptedClient;
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::json;
    use std::time::Duration;

    mock! {
        Client {}

        #[async_trait]
        impl ServiceClient for Client {
            fn service(&self) -> &str;
            async fn authenticate(&self) -> Result<Token, ServiceError>;
            async fn call(
                &self,
                token: &Token,
                operation: &str,
                params: &serde_json::Value,
            ) -> Result<serde_json::Value, ServiceError>;
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(RetryConfig::new().with_base_delay(Duration::from_millis(10)))
    }

    fn wrap(client: Arc<dyn ServiceClient>, breakers: &CircuitBreakerRegistry) -> ResilientService {
        ResilientService::new(client, Arc::new(AuthTokenCache::default()), breakers, fast_retry())
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_credentials_reauthenticate_once() {
        let mut mock = MockClient::new();
        mock.expect_service().return_const("banking".to_string());
        mock.expect_authenticate()
            .times(2)
            .returning(|| Ok(Token::new("fresh", Duration::from_secs(600))));
        let mut outcomes = vec![
            Ok(json!({"balance": 10})),
            Err(ServiceError::authentication("banking", "token revoked")),
        ];
        mock.expect_call()
            .times(2)
            .returning(move |_, _, _| outcomes.pop().unwrap_or_else(|| Ok(json!(null))));

        let breakers = CircuitBreakerRegistry::default();
        let service = wrap(Arc::new(mock), &breakers);

        let value = service.call("balance", json!({})).await.unwrap();
        assert_eq!(value, json!({"balance": 10}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_authentication_failure_propagates() {
        let client = Arc::new(
            ScriptedClient::new("mail")
                .respond("send_report", Err(ServiceError::authentication("mail", "revoked")))
                .respond("send_report", Err(ServiceError::authentication("mail", "revoked"))),
        );
        let breakers = CircuitBreakerRegistry::default();
        let service = wrap(client.clone(), &breakers);

        let err = service.call("send_report", json!({})).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(client.auth_calls(), 2);
        assert_eq!(client.calls_to("send_report"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_reuse_token() {
        let client = Arc::new(
            ScriptedClient::new("banking")
                .respond("list_transactions", Err(ServiceError::transient("banking", "503")))
                .respond("list_transactions", Ok(json!({"transactions": []}))),
        );
        let breakers = CircuitBreakerRegistry::default();
        let service = wrap(client.clone(), &breakers);

        service.call("list_transactions", json!({})).await.unwrap();

        assert_eq!(client.auth_calls(), 1);
        assert_eq!(client.calls_to("list_transactions"), 2);
        let tokens: Vec<String> = client.recorded_calls().into_iter().map(|c| c.token).collect();
        assert_eq!(tokens[0], tokens[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_rejects_after_sustained_failures() {
        let client = Arc::new(
            ScriptedClient::new("generative_ai")
                .respond_always("categorize", Err(ServiceError::fatal("generative_ai", "bad prompt"))),
        );
        let breakers = CircuitBreakerRegistry::new(BreakerConfig::default());
        let service = wrap(client.clone(), &breakers);

        for _ in 0..5 {
            let err = service.call("categorize", json!({})).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Fatal);
        }
        let err = service.call("categorize", json!({})).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert_eq!(client.calls_to("categorize"), 5);
        assert_eq!(breakers.get("generative_ai").state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_blocks_reauthentication() {
        let client = Arc::new(
            ScriptedClient::new("banking")
                .with_token_ttl(Duration::from_secs(30))
                .respond("list_transactions", Ok(json!({"transactions": []})))
                .respond_always("transfer", Err(ServiceError::transient("banking", "503"))),
        );
        let breakers = CircuitBreakerRegistry::new(BreakerConfig::default().with_failure_threshold(3));
        let service = ResilientService::new(
            client.clone(),
            Arc::new(AuthTokenCache::default()),
            &breakers,
            RetryPolicy::new(RetryConfig::new().with_max_attempts(3)),
        );

        service.call("list_transactions", json!({})).await.unwrap();
        let err = service.call("transfer", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
        assert_eq!(breakers.get("banking").state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        let err = service.call("list_transactions", json!({})).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert_eq!(client.auth_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_outage_trips_breaker() {
        let client = Arc::new(
            ScriptedClient::new("mail")
                .with_auth_result(Err(ServiceError::transient("mail", "token endpoint down")))
                .with_auth_result(Err(ServiceError::transient("mail", "token endpoint down"))),
        );
        let breakers = CircuitBreakerRegistry::new(BreakerConfig::default().with_failure_threshold(2));
        let service = wrap(client.clone(), &breakers);

        for _ in 0..2 {
            let err = service.call("send_report", json!({})).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Transient);
        }
        let err = service.call("send_report", json!({})).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert_eq!(client.auth_calls(), 2);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_authenticate_failure_is_not_retried() {
        let client = Arc::new(
            ScriptedClient::new("spreadsheet")
                .with_auth_result(Err(ServiceError::authentication("spreadsheet", "bad key"))),
        );
        let breakers = CircuitBreakerRegistry::default();
        let service = wrap(client.clone(), &breakers);

        let err = service.call("read_budget", json!({})).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(client.auth_calls(), 1);
        assert_eq!(client.calls_to("read_budget"), 0);
    }
}
