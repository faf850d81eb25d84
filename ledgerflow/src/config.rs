//! Configuration for a ledgerflow run.
//!
//! Loaded from a JSON file. Secrets are normally left out of the file and
//! supplied through `LEDGERFLOW_<SERVICE>_CLIENT_ID` and
//! `LEDGERFLOW_<SERVICE>_CLIENT_SECRET`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::errors::ConfigError;
use crate::resilience::{AuthConfig, BreakerConfig, RetryConfig, MAX_TOKEN_LIFETIME};
use crate::services::ServiceKind;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "LEDGERFLOW";

/// Connection settings for one external service.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Base URL; operations are posted to `{base_url}/{operation}`.
    pub base_url: String,
    /// URL of the token endpoint.
    pub token_url: String,
    /// OAuth client identifier.
    #[serde(default)]
    pub client_id: String,
    /// OAuth client secret. Never serialized.
    #[serde(default, skip_serializing)]
    pub client_secret: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// Retry settings overriding the run-wide ones for this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

fn default_timeout() -> f64 {
    30.0
}

impl ServiceEndpoint {
    /// Creates an endpoint with default timeout and no credentials.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token_url: token_url.into(),
            client_id: String::new(),
            client_secret: String::new(),
            timeout_seconds: default_timeout(),
            retry: None,
        }
    }

    /// Sets the client credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = client_id.into();
        self.client_secret = client_secret.into();
        self
    }

    /// Sets a per-service retry override.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Gets timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }
}

impl fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("base_url", &self.base_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("timeout_seconds", &self.timeout_seconds)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Endpoints for the four services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Banking provider.
    pub banking: ServiceEndpoint,
    /// Budget spreadsheet.
    pub spreadsheet: ServiceEndpoint,
    /// Generative-AI provider.
    pub generative_ai: ServiceEndpoint,
    /// Mail provider.
    pub mail: ServiceEndpoint,
}

impl ServicesConfig {
    /// Returns the endpoint for a service.
    #[must_use]
    pub fn get(&self, kind: ServiceKind) -> &ServiceEndpoint {
        match kind {
            ServiceKind::Banking => &self.banking,
            ServiceKind::Spreadsheet => &self.spreadsheet,
            ServiceKind::GenerativeAi => &self.generative_ai,
            ServiceKind::Mail => &self.mail,
        }
    }

    fn get_mut(&mut self, kind: ServiceKind) -> &mut ServiceEndpoint {
        match kind {
            ServiceKind::Banking => &mut self.banking,
            ServiceKind::Spreadsheet => &mut self.spreadsheet,
            ServiceKind::GenerativeAi => &mut self.generative_ai,
            ServiceKind::Mail => &mut self.mail,
        }
    }
}

/// Settings of the weekly workflow itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// How many days of transactions to retrieve.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Transactions per classification request.
    #[serde(default = "default_batch_size")]
    pub categorize_batch_size: usize,
    /// Destination account for surplus transfers. No transfer without it.
    #[serde(default)]
    pub savings_account: Option<String>,
    /// Report recipient address.
    #[serde(default)]
    pub report_recipient: String,
    /// Smallest surplus worth transferring.
    #[serde(default = "default_min_transfer")]
    pub min_transfer_amount: f64,
    /// Compute the transfer but do not execute it.
    #[serde(default)]
    pub dry_run_transfers: bool,
}

fn default_lookback_days() -> u32 {
    7
}

fn default_batch_size() -> usize {
    25
}

fn default_min_transfer() -> f64 {
    1.0
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            categorize_batch_size: default_batch_size(),
            savings_account: None,
            report_recipient: String::new(),
            min_transfer_amount: default_min_transfer(),
            dry_run_transfers: false,
        }
    }
}

impl WorkflowConfig {
    /// Creates a new workflow configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the savings account.
    #[must_use]
    pub fn with_savings_account(mut self, account: impl Into<String>) -> Self {
        self.savings_account = Some(account.into());
        self
    }

    /// Sets the report recipient.
    #[must_use]
    pub fn with_report_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.report_recipient = recipient.into();
        self
    }

    /// Sets the classification batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.categorize_batch_size = size;
        self
    }

    /// Sets the minimum transfer amount.
    #[must_use]
    pub fn with_min_transfer_amount(mut self, amount: f64) -> Self {
        self.min_transfer_amount = amount;
        self
    }

    /// Enables or disables dry-run transfers.
    #[must_use]
    pub fn with_dry_run_transfers(mut self, dry_run: bool) -> Self {
        self.dry_run_transfers = dry_run;
        self
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerflowConfig {
    /// Run-wide retry settings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Circuit breaker settings.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Token cache settings.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Service endpoints.
    pub services: ServicesConfig,
    /// Workflow settings.
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

impl LedgerflowConfig {
    /// Reads a file, applies environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration file without overrides or validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Parses configuration from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Fills credentials from `LEDGERFLOW_<SERVICE>_CLIENT_ID` and
    /// `LEDGERFLOW_<SERVICE>_CLIENT_SECRET` when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for kind in ServiceKind::ALL {
            let prefix = format!("{ENV_PREFIX}_{}", kind.as_str().to_uppercase());
            let endpoint = self.services.get_mut(kind);
            if let Some(id) = lookup(&format!("{prefix}_CLIENT_ID")) {
                debug!(service = %kind, "Client id taken from environment");
                endpoint.client_id = id;
            }
            if let Some(secret) = lookup(&format!("{prefix}_CLIENT_SECRET")) {
                debug!(service = %kind, "Client secret taken from environment");
                endpoint.client_secret = secret;
            }
        }
    }

    /// Returns the retry settings for a service, honouring its override.
    #[must_use]
    pub fn retry_for(&self, kind: ServiceKind) -> RetryConfig {
        self.services
            .get(kind)
            .retry
            .clone()
            .unwrap_or_else(|| self.retry.clone())
    }

    /// Checks every value for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_retry("retry", &self.retry)?;

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid("breaker.failure_threshold must be > 0"));
        }
        if self.breaker.cooldown_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "breaker.cooldown_multiplier must be >= 1",
            ));
        }
        if self.breaker.max_cooldown_ms < self.breaker.cooldown_ms {
            return Err(ConfigError::invalid(
                "breaker.max_cooldown_ms must be >= breaker.cooldown_ms",
            ));
        }
        if self.auth.refresh_skew() >= MAX_TOKEN_LIFETIME {
            return Err(ConfigError::invalid(format!(
                "auth.refresh_skew_seconds must be < {}",
                MAX_TOKEN_LIFETIME.as_secs()
            )));
        }

        for kind in ServiceKind::ALL {
            let endpoint = self.services.get(kind);
            if endpoint.base_url.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "services.{kind}.base_url is empty"
                )));
            }
            if endpoint.token_url.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "services.{kind}.token_url is empty"
                )));
            }
            if endpoint.timeout_seconds <= 0.0 || !endpoint.timeout_seconds.is_finite() {
                return Err(ConfigError::invalid(format!(
                    "services.{kind}.timeout_seconds must be positive"
                )));
            }
            if let Some(retry) = &endpoint.retry {
                validate_retry(&format!("services.{kind}.retry"), retry)?;
            }
        }

        let workflow = &self.workflow;
        if workflow.lookback_days == 0 {
            return Err(ConfigError::invalid("workflow.lookback_days must be > 0"));
        }
        if workflow.categorize_batch_size == 0 {
            return Err(ConfigError::invalid(
                "workflow.categorize_batch_size must be > 0",
            ));
        }
        if workflow.min_transfer_amount < 0.0 {
            return Err(ConfigError::invalid(
                "workflow.min_transfer_amount must not be negative",
            ));
        }
        Ok(())
    }
}

fn validate_retry(section: &str, retry: &RetryConfig) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 {
        return Err(ConfigError::invalid(format!(
            "{section}.max_attempts must be > 0"
        )));
    }
    if retry.backoff_factor < 1.0 {
        return Err(ConfigError::invalid(format!(
            "{section}.backoff_factor must be >= 1"
        )));
    }
    if retry.jitter_min <= 0.0 || retry.jitter_min > retry.jitter_max {
        return Err(ConfigError::invalid(format!(
            "{section}.jitter range must satisfy 0 < jitter_min <= jitter_max"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "services": {
            "banking": {"base_url": "https://bank.test/api", "token_url": "https://bank.test/token"},
            "spreadsheet": {"base_url": "https://sheets.test", "token_url": "https://sheets.test/token"},
            "generative_ai": {
                "base_url": "https://ai.test",
                "token_url": "https://ai.test/token",
                "retry": {"max_attempts": 5}
            },
            "mail": {"base_url": "https://mail.test", "token_url": "https://mail.test/token"}
        },
        "workflow": {"savings_account": "SAV-1", "report_recipient": "me@example.com"}
    }"#;

    fn minimal() -> LedgerflowConfig {
        LedgerflowConfig::from_json_str(MINIMAL).unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = minimal();

        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.breaker, BreakerConfig::default());
        assert_eq!(config.auth, AuthConfig::default());
        assert_eq!(config.workflow.lookback_days, 7);
        assert_eq!(config.workflow.categorize_batch_size, 25);
        assert_eq!(config.workflow.savings_account.as_deref(), Some("SAV-1"));
        assert!(!config.workflow.dry_run_transfers);
        assert_eq!(config.services.mail.timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_per_service_retry_override() {
        let config = minimal();

        assert_eq!(config.retry_for(ServiceKind::GenerativeAi).max_attempts, 5);
        assert_eq!(config.retry_for(ServiceKind::GenerativeAi).base_delay_ms, 1000);
        assert_eq!(config.retry_for(ServiceKind::Banking), config.retry);
    }

    #[test]
    fn test_env_overrides_fill_credentials() {
        let mut config = minimal();
        let env: HashMap<&str, &str> = [
            ("LEDGERFLOW_BANKING_CLIENT_ID", "bank-id"),
            ("LEDGERFLOW_BANKING_CLIENT_SECRET", "bank-secret"),
            ("LEDGERFLOW_GENERATIVE_AI_CLIENT_SECRET", "ai-secret"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.services.banking.client_id, "bank-id");
        assert_eq!(config.services.banking.client_secret, "bank-secret");
        assert_eq!(config.services.generative_ai.client_secret, "ai-secret");
        assert_eq!(config.services.mail.client_id, "");
    }

    #[test]
    fn test_secret_is_redacted_and_not_serialized() {
        let endpoint = ServiceEndpoint::new("https://a", "https://a/token")
            .with_credentials("id", "hunter2");

        assert!(!format!("{endpoint:?}").contains("hunter2"));
        assert!(!serde_json::to_string(&endpoint).unwrap().contains("hunter2"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases: Vec<(&str, Box<dyn Fn(&mut LedgerflowConfig)>)> = vec![
            ("max_attempts", Box::new(|c| c.retry.max_attempts = 0)),
            ("backoff_factor", Box::new(|c| c.retry.backoff_factor = 0.5)),
            ("jitter", Box::new(|c| {
                c.retry.jitter_min = 1.3;
                c.retry.jitter_max = 1.1;
            })),
            ("jitter", Box::new(|c| c.retry.jitter_min = 0.0)),
            ("failure_threshold", Box::new(|c| c.breaker.failure_threshold = 0)),
            ("base_url", Box::new(|c| c.services.mail.base_url = String::new())),
            ("token_url", Box::new(|c| c.services.banking.token_url = " ".into())),
            ("services.generative_ai.retry", Box::new(|c| {
                c.services.generative_ai.retry = Some(RetryConfig::new().with_max_attempts(0));
            })),
            ("categorize_batch_size", Box::new(|c| c.workflow.categorize_batch_size = 0)),
            ("refresh_skew_seconds", Box::new(|c| c.auth.refresh_skew_seconds = u64::MAX)),
        ];

        for (needle, mutate) in cases {
            let mut config = minimal();
            mutate(&mut config);
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains(needle), "expected '{needle}' in '{err}'");
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = LedgerflowConfig::load(file.path()).unwrap();

        assert_eq!(config.services.banking.base_url, "https://bank.test/api");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LedgerflowConfig::from_file(dir.path().join("absent.json")).unwrap_err();

        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn test_missing_services_is_parse_error() {
        let err = LedgerflowConfig::from_json_str("{}").unwrap_err();

        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
