//! # Configuration
//!
//! TOML configuration for the `smsrelay` daemon. Every section has defaults,
//! so a file only needs the keys it wants to change.
//!
//! ```toml
//! [modem]
//! device_path = "/var/spool/smsrelay"
//! request_timeout_secs = 10
//!
//! [polling]
//! interval_secs = 1
//! delete_after_read = true
//!
//! [retry.fetch]
//! max_retries = 7
//! initial_backoff_ms = 100
//! max_backoff_ms = 2000
//!
//! [reassembly]
//! incomplete = "hold"
//! hold_timeout_secs = 60
//!
//! [delivery]
//! url = "https://relay.example.org/hook"
//! secret = "change-me"
//! timeout_secs = 10
//!
//! [logging]
//! level = "info"
//! file = "smsrelay.log"
//! ```
//!
//! Use [`Config::load`] to read a file and [`Config::create_default`] to
//! write a starting point (`smsrelay init`).

use crate::bridge::RetryPolicy;
use crate::reassembly::IncompletePolicy;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub modem: ModemConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub reassembly: ReassemblyConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModemConfig {
    /// Device node, or the spool directory for the spool transport.
    pub device_path: String,
    /// How long a single request may wait on the device before it is reported
    /// as timed out.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/cdc-wdm0".to_string(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ModemConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub interval_secs: u64,
    /// Delete every fragment of a message once it has been forwarded.
    #[serde(default)]
    pub delete_after_read: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1,
            delete_after_read: false,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryPolicy::allocation_default")]
    pub allocation: RetryPolicy,
    #[serde(default = "RetryPolicy::fetch_default")]
    pub fetch: RetryPolicy,
    #[serde(default = "RetryPolicy::delete_default")]
    pub delete: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            allocation: RetryPolicy::allocation_default(),
            fetch: RetryPolicy::fetch_default(),
            delete: RetryPolicy::delete_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassemblyConfig {
    #[serde(default)]
    pub incomplete: IncompletePolicy,
    /// Only used with `incomplete = "hold"`.
    #[serde(default = "default_hold_timeout_secs")]
    pub hold_timeout_secs: u64,
}

fn default_hold_timeout_secs() -> u64 {
    60
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            incomplete: IncompletePolicy::EmitPartial,
            hold_timeout_secs: default_hold_timeout_secs(),
        }
    }
}

impl ReassemblyConfig {
    pub fn hold_timeout(&self) -> Duration {
        Duration::from_secs(self.hold_timeout_secs)
    }
}

/// Downstream webhook. An empty `url` disables forwarding; messages are then
/// only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_delivery_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra PEM trust anchor for `https://` relays with a private CA.
    #[serde(default)]
    pub ca_cert_path: Option<String>,
}

fn default_delivery_timeout_secs() -> u64 {
    10
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            secret: String::new(),
            timeout_secs: default_delivery_timeout_secs(),
            ca_cert_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("smsrelay.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.modem.device_path.trim().is_empty() {
            return Err(anyhow!("modem.device_path must not be empty"));
        }
        if self.polling.interval_secs == 0 {
            return Err(anyhow!("polling.interval_secs must be greater than zero"));
        }
        if !self.delivery.url.is_empty() && self.delivery.secret.is_empty() {
            return Err(anyhow!("delivery.secret is required when delivery.url is set"));
        }
        if matches!(&self.delivery.ca_cert_path, Some(p) if p.trim().is_empty()) {
            return Err(anyhow!("delivery.ca_cert_path must not be empty when set"));
        }
        Ok(())
    }
}
