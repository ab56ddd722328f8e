//! Domain data model for subscribers, selections, reminder payloads and delivery outcomes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, provider-specific push subscription blob.
///
/// Stored exactly as the browser handed it over during registration
/// (a JSON document with `endpoint` and `keys`). The core never interprets it
/// beyond pulling out the endpoint URL for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PushEndpoint(String);

impl PushEndpoint {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The push service URL inside the blob, if the blob is a Web Push subscription.
    pub fn endpoint_url(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.0).ok()?;
        value["endpoint"].as_str().map(String::from)
    }

    /// The blob as JSON, or as a plain string when it isn't valid JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.0).unwrap_or_else(|_| serde_json::Value::String(self.0.clone()))
    }
}

/// A user who may receive reminders. Read-only to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    pub name: String,
    pub email: String,
    pub endpoint: PushEndpoint,
    /// Notifications switched on by the user.
    pub enabled: bool,
}

/// The current snack choice of one subscriber.
/// Recording a new choice replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub subscriber_id: String,
    pub items: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

/// A button shown on the notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    #[serde(rename = "action")]
    pub id: String,
    #[serde(rename = "title")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Opaque data the service worker reads on click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
    /// Creation instant in epoch milliseconds, for client-side staleness checks.
    pub timestamp: i64,
}

/// The reminder as delivered to the browser's service worker.
/// Composed once per run and shared by every dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Receiving clients replace a shown notification with the same tag.
    pub tag: String,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
    pub data: NotificationData,
}

impl NotificationPayload {
    /// Wire form sent through the push transport.
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    /// The push service says the endpoint is gone. A signal, not a retryable failure.
    Expired,
    Failed,
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub subscriber_id: String,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn delivered(subscriber_id: &str) -> Self {
        Self {
            subscriber_id: subscriber_id.to_string(),
            status: DeliveryStatus::Delivered,
            error: None,
        }
    }

    pub fn expired(subscriber_id: &str) -> Self {
        Self {
            subscriber_id: subscriber_id.to_string(),
            status: DeliveryStatus::Expired,
            error: None,
        }
    }

    pub fn failed(subscriber_id: &str, error: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.to_string(),
            status: DeliveryStatus::Failed,
            error: Some(error.into()),
        }
    }
}
