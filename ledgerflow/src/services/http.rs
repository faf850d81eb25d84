//! JSON-over-HTTP implementation of [`ServiceClient`].
//!
//! One long-lived `reqwest::Client` per service. Responses are classified
//! here, at the edge, so nothing above this module sees status codes.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{ServiceClient, Token};
use crate::config::ServiceEndpoint;
use crate::errors::ServiceError;

const BODY_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// A [`ServiceClient`] speaking JSON over HTTP with bearer tokens.
#[derive(Debug, Clone)]
pub struct HttpServiceClient {
    service: String,
    endpoint: ServiceEndpoint,
    client: Client,
}

impl HttpServiceClient {
    /// Creates a client for `service` using `endpoint`.
    pub fn new(service: impl Into<String>, endpoint: ServiceEndpoint) -> Result<Self, ServiceError> {
        let service = service.into();
        let client = Client::builder()
            .timeout(endpoint.timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ServiceError::fatal(service.clone(), format!("HTTP client: {e}")))?;

        Ok(Self {
            service,
            endpoint,
            client,
        })
    }

    /// Returns the URL an operation is posted to.
    #[must_use]
    pub fn operation_url(&self, operation: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.base_url.trim_end_matches('/'),
            operation.trim_start_matches('/')
        )
    }

    fn transport_error(&self, err: &reqwest::Error) -> ServiceError {
        if err.is_timeout() || err.is_connect() || err.is_body() {
            ServiceError::transient(self.service.clone(), err.to_string())
        } else {
            ServiceError::fatal(self.service.clone(), err.to_string())
        }
    }
}

#[async_trait]
impl ServiceClient for HttpServiceClient {
    fn service(&self) -> &str {
        &self.service
    }

    async fn authenticate(&self) -> Result<Token, ServiceError> {
        let response = self
            .client
            .post(&self.endpoint.token_url)
            .json(&serde_json::json!({
                "grant_type": "client_credentials",
                "client_id": self.endpoint.client_id,
                "client_secret": self.endpoint.client_secret,
            }))
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(&e))?;
        if !status.is_success() {
            return Err(ServiceError::authentication(
                self.service.clone(),
                format!("token endpoint returned HTTP {}: {}", status.as_u16(), snippet(&body)),
            ));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            ServiceError::authentication(
                self.service.clone(),
                format!("malformed token response: {e}"),
            )
        })?;
        Ok(Token::new(
            parsed.access_token,
            Duration::from_secs(parsed.expires_in),
        ))
    }

    async fn call(
        &self,
        token: &Token,
        operation: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError> {
        let url = self.operation_url(operation);
        debug!(service = %self.service, %url, "POST");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.value())
            .json(params)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.map_err(|e| self.transport_error(&e))?;

        if !status.is_success() {
            return Err(classify_status(
                &self.service,
                status.as_u16(),
                retry_after,
                &body,
            ));
        }
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| {
            ServiceError::fatal(
                self.service.clone(),
                format!("undecodable response to '{operation}': {e}"),
            )
        })
    }
}

/// Maps a non-2xx HTTP status to a classified [`ServiceError`].
#[must_use]
pub fn classify_status(
    service: &str,
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> ServiceError {
    let message = format!("HTTP {status}: {}", snippet(body));
    match status {
        401 => ServiceError::authentication(service, message),
        429 => ServiceError::rate_limited(service, message, retry_after),
        408 | 500..=599 => ServiceError::transient(service, message),
        _ => ServiceError::fatal(service, message),
    }
}

/// Parses a `Retry-After` header given in seconds.
///
/// The HTTP-date form is not supported and yields `None`.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn snippet(body: &str) -> String {
    body.trim().chars().take(BODY_SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_classify_status() {
        let cases = [
            (401, ErrorKind::Authentication),
            (403, ErrorKind::Fatal),
            (404, ErrorKind::Fatal),
            (400, ErrorKind::Fatal),
            (408, ErrorKind::Transient),
            (429, ErrorKind::RateLimited),
            (500, ErrorKind::Transient),
            (503, ErrorKind::Transient),
        ];
        for (status, kind) in cases {
            assert_eq!(classify_status("banking", status, None, "").kind(), kind, "{status}");
        }
    }

    #[test]
    fn test_rate_limit_carries_suggested_wait() {
        let err = classify_status("generative_ai", 429, Some(Duration::from_secs(12)), "slow");

        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
        assert_eq!(err.message(), "HTTP 429: slow");
        assert_eq!(err.service(), "generative_ai");
    }

    #[test]
    fn test_message_truncates_body() {
        let body = "x".repeat(1000);
        let err = classify_status("mail", 500, None, &body);

        assert_eq!(err.message().len(), "HTTP 500: ".len() + BODY_SNIPPET_CHARS);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("-1"), None);
    }

    #[test]
    fn test_operation_url_joins_cleanly() {
        let client = HttpServiceClient::new(
            "banking",
            ServiceEndpoint::new("https://bank.test/api/", "https://bank.test/token"),
        )
        .unwrap();

        assert_eq!(
            client.operation_url("list_transactions"),
            "https://bank.test/api/list_transactions"
        );
        assert_eq!(client.operation_url("/transfer"), "https://bank.test/api/transfer");
    }

    #[tokio::test]
    async fn test_unreachable_token_endpoint_is_transient() {
        let client = HttpServiceClient::new(
            "banking",
            ServiceEndpoint::new("http://127.0.0.1:9", "http://127.0.0.1:9/token"),
        )
        .unwrap();

        let err = client.authenticate().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
