//! Notification composer: one reminder payload per run.
//! Deterministic: same template + same `now` → identical payload.

use chrono::{DateTime, Utc};

use snackbell_core::config::NotificationConfig;
use snackbell_core::types::{NotificationAction, NotificationData, NotificationPayload};

/// Action id the service worker maps to "open the snack picker".
pub const ACTION_SELECT: &str = "select-snack";
pub const ACTION_DISMISS: &str = "dismiss";

/// Builds reminder payloads from static copy.
#[derive(Debug, Clone)]
pub struct NotificationComposer {
    template: NotificationConfig,
}

impl NotificationComposer {
    pub fn new(template: NotificationConfig) -> Self {
        Self { template }
    }

    pub fn tag(&self) -> &str {
        &self.template.tag
    }

    /// Compose the reminder. Only `data.timestamp` depends on `now`.
    pub fn compose(&self, now: DateTime<Utc>) -> NotificationPayload {
        let t = &self.template;
        NotificationPayload {
            title: t.title.clone(),
            body: t.body.clone(),
            icon: t.icon.clone(),
            badge: t.badge.clone(),
            tag: t.tag.clone(),
            require_interaction: t.require_interaction,
            actions: vec![
                NotificationAction {
                    id: ACTION_SELECT.into(),
                    label: "Select Snack".into(),
                    icon: Some(t.icon.clone()),
                },
                NotificationAction {
                    id: ACTION_DISMISS.into(),
                    label: "Dismiss".into(),
                    icon: None,
                },
            ],
            data: NotificationData {
                url: t.url.clone(),
                timestamp: now.timestamp_millis(),
            },
        }
    }
}

impl Default for NotificationComposer {
    fn default() -> Self {
        Self::new(NotificationConfig::default())
    }
}
