//! Capability traits the reminder scheduler consumes.
//! Implementations live elsewhere (SQLite store, HTTP relay transport, test stubs).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{NotificationPayload, PushEndpoint, Subscriber};

/// "Who hasn't picked a snack yet?"
#[async_trait]
pub trait EligibilityQuery: Send + Sync {
    /// Subscribers with notifications enabled, an endpoint registered, and no
    /// selection timestamped inside `[period_start, period_end]`.
    ///
    /// Called once per reminder run. Retries are the store's business.
    async fn find_unselected(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Vec<Subscriber>>;
}

/// Write side of the subscriber profile store.
#[async_trait]
pub trait SubscriberRegistry: Send + Sync {
    /// Switch notifications on/off and optionally replace the stored endpoint.
    async fn update_notification_preferences(
        &self,
        subscriber_id: &str,
        enabled: bool,
        endpoint: Option<PushEndpoint>,
    ) -> Result<()>;

    /// Forget the endpoint of a subscriber (e.g. after the push service reported it gone).
    /// Returns false when the subscriber is unknown.
    async fn deregister_endpoint(&self, subscriber_id: &str) -> Result<bool>;
}

/// What the push service said about one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResponse {
    Accepted,
    /// Endpoint no longer valid (HTTP 404 / 410).
    Gone,
    Rejected { status: u16, detail: String },
}

/// One outbound push call.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Deliver `payload` to `endpoint`. `Err` means the call itself failed
    /// (connection refused, timeout, ...).
    async fn send(
        &self,
        endpoint: &PushEndpoint,
        payload: &NotificationPayload,
    ) -> Result<PushResponse>;
}
