//! Test doubles shared by the scheduler's unit tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use snackbell_core::error::{Result, SnackBellError};
use snackbell_core::traits::{EligibilityQuery, PushResponse, PushTransport, SubscriberRegistry};
use snackbell_core::types::{NotificationPayload, PushEndpoint, Subscriber};

/// A subscriber whose endpoint tells [`ScriptedTransport`] how to answer:
/// `ok`, `gone`, `reject`, `error` or `panic`.
pub fn subscriber_with(id: &str, kind: &str) -> Subscriber {
    Subscriber {
        id: id.to_string(),
        name: format!("User {id}"),
        email: format!("{id}@example.com"),
        endpoint: PushEndpoint::new(format!(
            r#"{{"endpoint":"https://push.example/{kind}/{id}","keys":{{}}}}"#
        )),
        enabled: true,
    }
}

/// `n` subscribers; every 3rd one (indices 2, 5, 8, …) has an expired endpoint.
pub fn subscribers(n: usize) -> Vec<Subscriber> {
    (0..n)
        .map(|i| {
            let kind = if i % 3 == 2 { "gone" } else { "ok" };
            subscriber_with(&format!("u{i}"), kind)
        })
        .collect()
}

/// Transport that answers according to the endpoint URL and tracks concurrency.
#[derive(Default)]
pub struct ScriptedTransport {
    pub calls: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    in_flight: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        endpoint: &PushEndpoint,
        _payload: &NotificationPayload,
    ) -> Result<PushResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let url = endpoint.endpoint_url().unwrap_or_default();
        if url.contains("/gone/") {
            Ok(PushResponse::Gone)
        } else if url.contains("/reject/") {
            Ok(PushResponse::Rejected {
                status: 500,
                detail: "internal error".into(),
            })
        } else if url.contains("/error/") {
            Err(SnackBellError::Transport("connection reset".into()))
        } else if url.contains("/panic/") {
            panic!("scripted transport panic");
        } else {
            Ok(PushResponse::Accepted)
        }
    }
}

/// Eligibility query returning a fixed list, optionally failing or
/// blocking until released.
#[derive(Default)]
pub struct StaticEligibility {
    pub subscribers: Vec<Subscriber>,
    pub calls: AtomicUsize,
    pub fail: bool,
    pub last_period: Mutex<Option<(DateTime<Utc>, DateTime<Utc>)>>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl StaticEligibility {
    pub fn new(subscribers: Vec<Subscriber>) -> Self {
        Self {
            subscribers,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Blocks inside the query. Returns (entered, release) handles.
    pub fn gated(subscribers: Vec<Subscriber>) -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let query = Self {
            subscribers,
            gate: Some((Arc::clone(&entered), Arc::clone(&release))),
            ..Self::default()
        };
        (query, entered, release)
    }
}

#[async_trait]
impl EligibilityQuery for StaticEligibility {
    async fn find_unselected(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Vec<Subscriber>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_period.lock() {
            *last = Some((period_start, period_end));
        }
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        if self.fail {
            return Err(SnackBellError::EligibilityQuery("store unavailable".into()));
        }
        Ok(self.subscribers.clone())
    }
}

/// Registry that remembers which endpoints were deregistered.
#[derive(Default)]
pub struct RecordingRegistry {
    pub deregistered: Mutex<Vec<String>>,
}

#[async_trait]
impl SubscriberRegistry for RecordingRegistry {
    async fn update_notification_preferences(
        &self,
        _subscriber_id: &str,
        _enabled: bool,
        _endpoint: Option<PushEndpoint>,
    ) -> Result<()> {
        Ok(())
    }

    async fn deregister_endpoint(&self, subscriber_id: &str) -> Result<bool> {
        self.deregistered
            .lock()
            .map_err(|e| SnackBellError::Store(e.to_string()))?
            .push(subscriber_id.to_string());
        Ok(true)
    }
}
