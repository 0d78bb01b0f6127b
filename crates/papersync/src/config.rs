//! Client configuration: endpoint settings and poll cadences.
//!
//! Everything has serde defaults so an empty config document is valid; the
//! shipped defaults match the hosted API. `validate` catches the invariants
//! serde cannot express.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::poll::PollConfig;

/// Top-level configuration for the sync subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub processing: ProcessingPollConfig,
    #[serde(default)]
    pub billing: BillingSyncConfig,
}

impl SyncConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(content: &str) -> Result<SyncConfig, ConfigError> {
        let config: SyncConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.is_empty() {
            return Err(ConfigError::Validation {
                message: "api.baseUrl must not be empty".to_string(),
            });
        }
        if url::Url::parse(&self.api.base_url).is_err() {
            return Err(ConfigError::Validation {
                message: format!("api.baseUrl is not a valid URL: '{}'", self.api.base_url),
            });
        }
        self.processing.validate("processing")?;
        self.billing.validate("billing")?;
        Ok(())
    }
}

/// Remote endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.papersync.app".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ApiConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Poll cadence used while a document is being processed.
///
/// The defaults (2 s for up to 150 attempts) cover the five minutes the
/// pipeline is allowed to chew on a large paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingPollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_processing_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_processing_max_attempts() -> u32 {
    150
}

impl Default for ProcessingPollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_processing_max_attempts(),
        }
    }
}

impl ProcessingPollConfig {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig::new(Duration::from_millis(self.interval_ms), self.max_attempts)
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        validate_cadence(section, self.interval_ms, self.max_attempts)
    }
}

/// Reconciliation cadence after a checkout or portal return.
///
/// Webhook propagation at the billing provider usually lands within a few
/// seconds; ten attempts at 2 s bound the wait to twenty seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSyncConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_billing_max_attempts")]
    pub max_attempts: u32,
}

fn default_billing_max_attempts() -> u32 {
    10
}

impl Default for BillingSyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_billing_max_attempts(),
        }
    }
}

impl BillingSyncConfig {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig::new(Duration::from_millis(self.interval_ms), self.max_attempts)
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        validate_cadence(section, self.interval_ms, self.max_attempts)
    }
}

fn validate_cadence(section: &str, interval_ms: u64, max_attempts: u32) -> Result<(), ConfigError> {
    if interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: format!("{}.intervalMs must be positive", section),
        });
    }
    if max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: format!("{}.maxAttempts must be positive", section),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SyncConfig::from_json_str("{}").unwrap();
        assert_eq!(config.api.base_url, "https://api.papersync.app");
        assert_eq!(config.processing.interval_ms, 2000);
        assert_eq!(config.processing.max_attempts, 150);
        assert_eq!(config.billing.interval_ms, 2000);
        assert_eq!(config.billing.max_attempts, 10);
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let json = r#"{"processing":{"intervalMs":500}}"#;
        let config = SyncConfig::from_json_str(json).unwrap();
        assert_eq!(config.processing.interval_ms, 500);
        assert_eq!(config.processing.max_attempts, 150);
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        let err = SyncConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }

    #[test]
    fn test_zero_interval_fails_validation() {
        let json = r#"{"billing":{"intervalMs":0}}"#;
        let err = SyncConfig::from_json_str(json).unwrap_err();
        match err {
            ConfigError::Validation { message } => {
                assert!(message.contains("billing.intervalMs"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_zero_attempts_fails_validation() {
        let json = r#"{"processing":{"maxAttempts":0}}"#;
        let err = SyncConfig::from_json_str(json).unwrap_err();
        match err {
            ConfigError::Validation { message } => {
                assert!(message.contains("processing.maxAttempts"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_bad_base_url_fails_validation() {
        let json = r#"{"api":{"baseUrl":"not a url"}}"#;
        assert!(SyncConfig::from_json_str(json).is_err());
    }

    #[test]
    fn test_poll_config_conversion() {
        let processing = ProcessingPollConfig::default();
        let poll = processing.poll_config();
        assert_eq!(poll.interval, Duration::from_millis(2000));
        assert_eq!(poll.max_attempts, 150);
    }

    #[test]
    fn test_timeouts_convert_to_durations() {
        let api = ApiConfig::default();
        assert_eq!(api.connect_timeout(), Duration::from_secs(10));
        assert_eq!(api.request_timeout(), Duration::from_secs(30));
    }
}
