//! # Delivery
//!
//! Forwards each newly seen message to a downstream relay as a signed JSON
//! envelope:
//!
//! ```json
//! {"action":"send_message","payload":{"sender":"+86138...","text":"...","timestamp":"...","sign":"..."}}
//! ```
//!
//! The signature covers the message timestamp; see [`sign`].

pub mod sign;

use crate::config::DeliveryConfig;
use crate::logutil::{preview_text, mask_sender};
use crate::message::LogicalMessage;
use anyhow::{anyhow, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;

pub const SEND_MESSAGE_ACTION: &str = "send_message";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub sender: String,
    pub text: String,
    pub timestamp: String,
    pub sign: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    pub payload: Payload,
}

impl Envelope {
    pub fn for_message(message: &LogicalMessage, secret: &str) -> Self {
        Self {
            action: SEND_MESSAGE_ACTION.to_string(),
            payload: Payload {
                sender: message.sender.clone(),
                text: message.full_text.clone(),
                timestamp: message.timestamp.clone(),
                sign: sign::generate_sign(&message.timestamp, secret),
            },
        }
    }
}

/// HTTP webhook client. Disabled when no URL is configured.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    url: String,
    secret: String,
    timeout_secs: u64,
}

impl Forwarder {
    /// Build the forwarder. Fails if a configured CA certificate cannot be
    /// read or parsed.
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(path) = &config.ca_cert_path {
            let pem = std::fs::read(path)
                .map_err(|e| anyhow!("Failed to read CA certificate {}: {}", path, e))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| anyhow!("Invalid CA certificate {}: {}", path, e))?;
            builder = builder.add_root_certificate(cert);
            debug!("Trusting extra CA certificate from {}", path);
        }
        let client = builder
            .build()
            .map_err(|e| anyhow!("Failed to build delivery client: {}", e))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            secret: config.secret.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty()
    }

    /// Log the message and, when enabled, POST its envelope downstream.
    pub async fn forward(&self, message: &LogicalMessage) -> Result<()> {
        info!(
            "New message from {} at {} ({} fragment(s)): {}",
            mask_sender(&message.sender),
            message.timestamp,
            message.fragments.len(),
            preview_text(&message.full_text)
        );
        for fragment in &message.fragments {
            debug!(
                "  [index {}] part {}: {}",
                fragment.handle,
                fragment.part_index,
                preview_text(&fragment.text)
            );
        }
        if !self.is_enabled() {
            return Ok(());
        }

        let envelope = Envelope::for_message(message, &self.secret);
        let request = self.client.post(&self.url).json(&envelope);
        let response = timeout(Duration::from_secs(self.timeout_secs), request.send())
            .await
            .map_err(|_| anyhow!("Delivery timeout after {}s", self.timeout_secs))?
            .map_err(|e| anyhow!("Delivery request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("Relay returned status: {}", response.status()));
        }
        debug!("Delivered message {} to relay", message.primary_handle());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageFragment;

    fn message() -> LogicalMessage {
        LogicalMessage::single(MessageFragment {
            handle: 3,
            part_index: 1,
            raw: Vec::new(),
            text: "line one\nline two".into(),
            sender: "+8613800001234".into(),
            timestamp: "24/05/01,10:00:00+32".into(),
            concat: None,
        })
    }

    #[test]
    fn envelope_has_expected_shape() {
        let envelope = Envelope::for_message(&message(), "secret");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["action"], "send_message");
        assert_eq!(json["payload"]["sender"], "+8613800001234");
        assert_eq!(json["payload"]["text"], "line one\nline two");
        assert_eq!(json["payload"]["timestamp"], "24/05/01,10:00:00+32");
        assert_eq!(
            json["payload"]["sign"],
            "4j4m5NPBJ2etEAIymtdMcioRUHK0GoIfmXC8yY3HYTQ%3D"
        );
        assert!(sign::validate_sign(
            &envelope.payload.timestamp,
            &envelope.payload.sign,
            "secret"
        ));
    }

    #[tokio::test]
    async fn disabled_forwarder_only_logs() {
        let forwarder = Forwarder::new(&DeliveryConfig::default()).unwrap();
        assert!(!forwarder.is_enabled());
        forwarder.forward(&message()).await.unwrap();
    }

    const TEST_CA: &str = "-----BEGIN CERTIFICATE-----
MIIBhzCCAS2gAwIBAgIURHCQUmVk4tsHUlGz/P1YhB/lM6IwCgYIKoZIzj0EAwIw
GDEWMBQGA1UEAwwNc21zcmVsYXktdGVzdDAgFw0yNjEwMTYwNDE3MjdaGA8yMTI2
MDkyMjA0MTcyN1owGDEWMBQGA1UEAwwNc21zcmVsYXktdGVzdDBZMBMGByqGSM49
AgEGCCqGSM49AwEHA0IABNAc76voiy17uKzaCyvsuBcwJKk2rsRFoa69Yhc9hSVm
AVgKmu+DCvHQt/AyZ8tFwNqZ2g3pkFsFAEpMOYDH+HyjUzBRMB0GA1UdDgQWBBRR
t2SJQk3fR4njDft0xPbAPy2yRDAfBgNVHSMEGDAWgBRRt2SJQk3fR4njDft0xPbA
Py2yRDAPBgNVHRMBAf8EBTADAQH/MAoGCCqGSM49BAMCA0gAMEUCIQCEcpZCYZJH
hoxgIWYH0VY/L8K1xtuZ4ucbp/UxPmLtIQIgI1ozAagJ/bGstThOM/pKRQEKs+5a
BQwxBbr15heUteE=
-----END CERTIFICATE-----
";

    #[test]
    fn custom_ca_certificate_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.pem");
        std::fs::write(&path, TEST_CA).unwrap();
        let config = DeliveryConfig {
            url: "https://relay.example/hook".into(),
            secret: "s".into(),
            ca_cert_path: Some(path.to_str().unwrap().to_string()),
            ..DeliveryConfig::default()
        };
        assert!(Forwarder::new(&config).unwrap().is_enabled());
    }

    #[test]
    fn missing_ca_certificate_is_an_error() {
        let config = DeliveryConfig {
            ca_cert_path: Some("/no/such/ca.pem".into()),
            ..DeliveryConfig::default()
        };
        let err = Forwarder::new(&config).unwrap_err();
        assert!(err.to_string().contains("Failed to read CA certificate"));
    }
}
