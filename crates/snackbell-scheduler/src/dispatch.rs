//! Push dispatch. Sends the reminder to each subscriber and classifies the result.
//!
//! Classification:
//! - push service accepted → `delivered`
//! - push service says the endpoint is gone (404/410) → `expired`
//! - anything else (non-success status, transport error, panic) → `failed`
//!
//! Nothing is retried and nothing is deregistered here; the caller decides.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use snackbell_core::traits::{PushResponse, PushTransport};
use snackbell_core::types::{DeliveryOutcome, NotificationPayload, Subscriber};

/// Result of a fan-out pass.
#[derive(Debug, Default)]
pub struct FanOut {
    /// One outcome per dispatch that was started. Order is not meaningful.
    pub outcomes: Vec<DeliveryOutcome>,
    /// Subscribers never dispatched to because the pass was cancelled.
    pub skipped: Vec<String>,
}

/// Sends payloads through a transport, at most `concurrency` at a time.
pub struct PushDispatcher {
    transport: Arc<dyn PushTransport>,
    concurrency: usize,
}

impl PushDispatcher {
    pub fn new(transport: Arc<dyn PushTransport>, concurrency: usize) -> Self {
        Self {
            transport,
            concurrency: concurrency.max(1),
        }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Send one payload to one subscriber.
    pub async fn dispatch(
        &self,
        subscriber: &Subscriber,
        payload: &NotificationPayload,
    ) -> DeliveryOutcome {
        dispatch_one(self.transport.as_ref(), subscriber, payload).await
    }

    /// Send `payload` to every subscriber and wait for all started sends.
    ///
    /// Once `cancel` fires no new send starts; sends already in flight finish
    /// and the rest come back in [`FanOut::skipped`].
    pub async fn dispatch_all(
        &self,
        subscribers: Vec<Subscriber>,
        payload: Arc<NotificationPayload>,
        cancel: &CancellationToken,
    ) -> FanOut {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        let mut skipped = Vec::new();
        let mut pending = subscribers.into_iter();

        while let Some(subscriber) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                skipped.push(subscriber.id);
                skipped.extend(pending.by_ref().map(|s| s.id));
                break;
            };

            let transport = Arc::clone(&self.transport);
            let payload = Arc::clone(&payload);
            workers.spawn(async move {
                let _permit = permit;
                AssertUnwindSafe(dispatch_one(transport.as_ref(), &subscriber, &payload))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!("💥 Dispatch to {} panicked", subscriber.id);
                        DeliveryOutcome::failed(&subscriber.id, "dispatch task panicked")
                    })
            });
        }

        if !skipped.is_empty() {
            tracing::warn!(
                "⏹️ Fan-out cancelled, {} subscriber(s) not dispatched",
                skipped.len()
            );
        }

        let mut outcomes = Vec::with_capacity(workers.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!("Dispatch task aborted: {e}"),
            }
        }

        FanOut { outcomes, skipped }
    }
}

async fn dispatch_one(
    transport: &dyn PushTransport,
    subscriber: &Subscriber,
    payload: &NotificationPayload,
) -> DeliveryOutcome {
    match transport.send(&subscriber.endpoint, payload).await {
        Ok(PushResponse::Accepted) => {
            tracing::debug!("✅ Reminder sent to {} ({})", subscriber.name, subscriber.email);
            DeliveryOutcome::delivered(&subscriber.id)
        }
        Ok(PushResponse::Gone) => {
            tracing::info!(
                "🗑️ Push endpoint of {} ({}) expired",
                subscriber.name,
                subscriber.id
            );
            DeliveryOutcome::expired(&subscriber.id)
        }
        Ok(PushResponse::Rejected { status, detail }) => {
            tracing::warn!(
                "⚠️ Push to {} rejected with {status}: {detail}",
                subscriber.id
            );
            DeliveryOutcome::failed(
                &subscriber.id,
                format!("push service returned {status}: {detail}"),
            )
        }
        Err(e) => {
            tracing::warn!("⚠️ Push to {} failed: {e}", subscriber.id);
            DeliveryOutcome::failed(&subscriber.id, e.to_string())
        }
    }
}
