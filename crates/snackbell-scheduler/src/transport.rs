//! Push transports, the outbound side of a dispatch.
//!
//! `RelayPushTransport` hands the subscription blob and payload to a Web Push
//! relay over HTTP (the relay does VAPID signing + payload encryption and
//! forwards the push service's status code). `DryRunTransport` only logs.

use std::time::Duration;

use async_trait::async_trait;

use snackbell_core::config::PushConfig;
use snackbell_core::error::{Result, SnackBellError};
use snackbell_core::traits::{PushResponse, PushTransport};
use snackbell_core::types::{NotificationPayload, PushEndpoint};

/// HTTP relay transport.
pub struct RelayPushTransport {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    ttl_secs: u64,
}

impl RelayPushTransport {
    pub fn new(url: &str, token: Option<String>, timeout: Duration, ttl_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SnackBellError::Transport(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            token,
            ttl_secs,
        })
    }

    pub fn from_config(config: &PushConfig) -> Result<Self> {
        Self::new(
            &config.relay_url,
            config.relay_token.clone(),
            Duration::from_secs(config.timeout_secs),
            config.ttl_secs,
        )
    }
}

#[async_trait]
impl PushTransport for RelayPushTransport {
    fn name(&self) -> &str {
        "relay"
    }

    async fn send(
        &self,
        endpoint: &PushEndpoint,
        payload: &NotificationPayload,
    ) -> Result<PushResponse> {
        let mut req = self.client.post(&self.url).json(&serde_json::json!({
            "subscription": endpoint.to_json(),
            "payload": payload,
            "ttl": self.ttl_secs,
        }));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SnackBellError::Transport(format!("Relay send failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            Ok(PushResponse::Accepted)
        } else if status == reqwest::StatusCode::GONE || status == reqwest::StatusCode::NOT_FOUND {
            Ok(PushResponse::Gone)
        } else {
            let detail = resp.text().await.unwrap_or_default();
            Ok(PushResponse::Rejected {
                status: status.as_u16(),
                detail,
            })
        }
    }
}

/// Logs the would-be push and reports it accepted.
#[derive(Debug, Default)]
pub struct DryRunTransport;

#[async_trait]
impl PushTransport for DryRunTransport {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn send(
        &self,
        endpoint: &PushEndpoint,
        payload: &NotificationPayload,
    ) -> Result<PushResponse> {
        tracing::info!(
            "🧪 [dry-run] would push '{}' to {}",
            payload.title,
            endpoint.endpoint_url().unwrap_or_else(|| "<opaque endpoint>".into())
        );
        Ok(PushResponse::Accepted)
    }
}

/// Pick the transport for a config: relay when a URL is set, dry run otherwise.
pub fn transport_from_config(config: &PushConfig) -> Result<std::sync::Arc<dyn PushTransport>> {
    if config.relay_url.is_empty() {
        tracing::warn!("⚠️ push.relay_url not set, reminders will only be logged (dry run)");
        Ok(std::sync::Arc::new(DryRunTransport))
    } else {
        Ok(std::sync::Arc::new(RelayPushTransport::from_config(config)?))
    }
}
