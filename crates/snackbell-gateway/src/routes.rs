//! API route handlers for the gateway.

use axum::http::{HeaderMap, StatusCode};
use axum::{
    Json,
    extract::{Query, State},
};
use std::collections::HashMap;
use std::sync::Arc;

use snackbell_core::error::SnackBellError;
use snackbell_core::types::PushEndpoint;

use super::server::AppState;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiResponse {
    (
        status,
        Json(serde_json::json!({"ok": false, "error": message.to_string()})),
    )
}

/// Health check endpoint: liveness plus a few store counters.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let now = chrono::Utc::now();
    let mut body = serde_json::json!({
        "status": "ok",
        "service": "snackbell-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": now.to_rfc3339(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "reminder_running": state.scheduler.is_running(),
        "next_reminder": state.scheduler.next_occurrence(now).to_rfc3339(),
    });
    // Counters are best-effort; health stays "ok" without them
    match state.store.stats() {
        Ok(stats) => {
            body["total_users"] = stats.total_users.into();
            body["subscribed_users"] = stats.subscribed_users.into();
            body["total_selections"] = stats.total_selections.into();
        }
        Err(e) => tracing::warn!("⚠️ Health stats unavailable: {e}"),
    }
    Json(body)
}

/// Public VAPID key the PWA needs to create a push subscription.
pub async fn vapid_key(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({"publicKey": state.config.push.vapid_public_key}))
}

/// Switch reminders on/off for a user.
///
/// Body: `{"user_id": "...", "enabled": true, "subscription": {...}}`. Enabling
/// requires the browser's push subscription; disabling forgets it.
pub async fn update_preferences(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let Some(user_id) = body["user_id"].as_str().filter(|s| !s.is_empty()) else {
        return api_error(StatusCode::BAD_REQUEST, "user_id is required");
    };
    let enabled = body["enabled"].as_bool().unwrap_or(false);

    let endpoint = match &body["subscription"] {
        serde_json::Value::Null => None,
        sub @ serde_json::Value::Object(_) => Some(PushEndpoint::new(sub.to_string())),
        // Some clients send the subscription pre-serialized
        serde_json::Value::String(s) => Some(PushEndpoint::new(s.clone())),
        _ => return api_error(StatusCode::BAD_REQUEST, "subscription must be an object"),
    };
    if enabled && endpoint.is_none() {
        return api_error(StatusCode::BAD_REQUEST, "Subscription data required");
    }
    let endpoint = if enabled { endpoint } else { None };

    match state
        .store
        .set_notification_preferences(user_id, enabled, endpoint.as_ref())
    {
        Ok(true) => {
            tracing::info!(
                "🔔 Notifications {} for {user_id}",
                if enabled { "enabled" } else { "disabled" }
            );
            (
                StatusCode::OK,
                Json(serde_json::json!({"ok": true, "subscribed": enabled})),
            )
        }
        Ok(false) => api_error(StatusCode::NOT_FOUND, format!("Unknown user '{user_id}'")),
        Err(e) => {
            tracing::error!("❌ Saving notification preferences failed: {e}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// `GET /api/notifications/status?user_id=...`
pub async fn notification_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let Some(user_id) = params.get("user_id") else {
        return api_error(StatusCode::BAD_REQUEST, "user_id is required");
    };
    match state.store.notification_status(user_id) {
        Ok(status) => {
            let status = status.unwrap_or(snackbell_scheduler::NotificationStatus {
                enabled: false,
                has_subscription: false,
            });
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "enabled": status.enabled,
                    "hasSubscription": status.has_subscription,
                })),
            )
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// ---- Reminder admin API ----

/// Trigger a reminder run now. The caller may name themselves in `X-Requested-By`.
///
/// The run executes on a scheduler-owned task: a client that disconnects
/// early does not cancel it, and its report still lands in the history.
pub async fn run_reminders(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResponse {
    let requested_by = headers
        .get("X-Requested-By")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .or_else(|| Some("api".to_string()));

    match state.scheduler.run_manual(None, requested_by).await {
        Ok(report) => match serde_json::to_value(&report) {
            Ok(report) => (
                StatusCode::OK,
                Json(serde_json::json!({"ok": true, "report": report})),
            ),
            Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e),
        },
        Err(e @ SnackBellError::ConcurrentRunRejected) => api_error(StatusCode::CONFLICT, e),
        Err(e @ SnackBellError::EligibilityQuery(_)) => api_error(StatusCode::BAD_GATEWAY, e),
        Err(e @ SnackBellError::Cancelled) => api_error(StatusCode::SERVICE_UNAVAILABLE, e),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Next scheduled reminder.
pub async fn next_reminder(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let now = chrono::Utc::now();
    let schedule = state.scheduler.schedule();
    let next = state.scheduler.next_occurrence(now);
    Json(serde_json::json!({
        "ok": true,
        "schedule": schedule.to_string(),
        "timezone": schedule.timezone().name(),
        "next": next.to_rfc3339(),
        "next_local": next.with_timezone(&schedule.timezone()).to_rfc3339(),
        "in_secs": (next - now).num_seconds(),
        "running": state.scheduler.is_running(),
    }))
}

/// Recent run reports, newest first.
pub async fn reminder_history(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut runs = state.scheduler.history();
    runs.reverse();
    Json(serde_json::json!({"ok": true, "runs": runs}))
}

/// Forget the push endpoints of the given subscribers (usually a run's `expired_ids`).
pub async fn deregister_endpoints(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let Some(ids) = body["subscriber_ids"].as_array() else {
        return api_error(StatusCode::BAD_REQUEST, "subscriber_ids must be an array");
    };
    let ids: Vec<String> = ids
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();

    match state.scheduler.deregister_expired(&ids).await {
        Ok(removed) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "requested": ids.len(), "removed": removed})),
        ),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{AppState, build_router};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use snackbell_core::config::SnackBellConfig;
    use snackbell_core::traits::{EligibilityQuery, PushResponse, PushTransport, SubscriberRegistry};
    use snackbell_core::types::{NotificationPayload, Subscriber};
    use snackbell_scheduler::{
        DryRunTransport, PushDispatcher, ReminderScheduler, Schedule, SubscriberDb,
    };
    use tower::ServiceExt;

    const SUB: &str = r#"{"endpoint":"https://push.example/abc","keys":{"p256dh":"k","auth":"a"}}"#;

    fn seeded_store() -> Arc<SubscriberDb> {
        let store = SubscriberDb::open_in_memory().unwrap();
        store.upsert_user("u1", "Anne", "anne@example.com").unwrap();
        store.upsert_user("u2", "Bram", "bram@example.com").unwrap();
        store
            .set_notification_preferences("u1", true, Some(&PushEndpoint::new(SUB)))
            .unwrap();
        Arc::new(store)
    }

    fn app_state(admin_token: Option<&str>) -> AppState {
        let mut config = SnackBellConfig::default();
        config.push.vapid_public_key = "BPUBLIC".into();
        config.gateway.admin_token = admin_token.map(String::from);

        let store = seeded_store();
        let registry: Arc<dyn SubscriberRegistry> = store.clone();
        let scheduler = ReminderScheduler::from_config(
            &config,
            store.clone(),
            Some(registry),
            Arc::new(DryRunTransport),
        )
        .unwrap();
        AppState::new(config, Arc::new(scheduler), store)
    }

    fn test_state() -> State<Arc<AppState>> {
        State(Arc::new(app_state(None)))
    }

    struct BrokenStore;

    #[async_trait]
    impl EligibilityQuery for BrokenStore {
        async fn find_unselected(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> snackbell_core::Result<Vec<Subscriber>> {
            Err(SnackBellError::EligibilityQuery("database is locked".into()))
        }
    }

    /// Accepts every push after a pause.
    struct SlowTransport;

    #[async_trait]
    impl PushTransport for SlowTransport {
        fn name(&self) -> &str {
            "slow"
        }

        async fn send(
            &self,
            _endpoint: &PushEndpoint,
            _payload: &NotificationPayload,
        ) -> snackbell_core::Result<PushResponse> {
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            Ok(PushResponse::Accepted)
        }
    }

    // ---- Public API ----

    #[tokio::test]
    async fn test_health_check() {
        let json = health_check(test_state()).await.0;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["total_users"], 2);
        assert_eq!(json["subscribed_users"], 1);
        assert_eq!(json["total_selections"], 0);
        assert!(json["uptime_secs"].is_u64());
        assert_eq!(json["reminder_running"], false);
        assert!(json["next_reminder"].is_string());
    }

    #[tokio::test]
    async fn test_vapid_key() {
        let json = vapid_key(test_state()).await.0;
        assert_eq!(json["publicKey"], "BPUBLIC");
    }

    #[tokio::test]
    async fn test_enable_then_disable_notifications() {
        let state = test_state();
        let (status, _) = update_preferences(
            state.clone(),
            Json(serde_json::json!({
                "user_id": "u2",
                "enabled": true,
                "subscription": {"endpoint": "https://push.example/u2", "keys": {}},
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.store.stats().unwrap().subscribed_users, 2);

        let (status, Json(json)) = update_preferences(
            state.clone(),
            Json(serde_json::json!({"user_id": "u2", "enabled": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["subscribed"], false);

        let mut query = HashMap::new();
        query.insert("user_id".to_string(), "u2".to_string());
        let (_, Json(json)) = notification_status(state, Query(query)).await;
        assert_eq!(json["enabled"], false);
        assert_eq!(json["hasSubscription"], false);
    }

    #[tokio::test]
    async fn test_preferences_validation() {
        let (status, _) = update_preferences(
            test_state(),
            Json(serde_json::json!({"user_id": "u2", "enabled": true})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            update_preferences(test_state(), Json(serde_json::json!({"enabled": false}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = update_preferences(
            test_state(),
            Json(serde_json::json!({"user_id": "ghost", "enabled": false})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ---- Reminder admin API ----

    #[tokio::test]
    async fn test_manual_run_reports_and_records_history() {
        let state = test_state();
        let (status, Json(json)) = run_reminders(state.clone(), HeaderMap::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["report"]["eligible"], 1);
        assert_eq!(json["report"]["delivered"], 1);
        assert_eq!(json["report"]["trigger"]["kind"], "manual");
        assert_eq!(json["report"]["trigger"]["requested_by"], "api");

        let history = reminder_history(state).await.0;
        assert_eq!(history["runs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_run_survives_client_disconnect() {
        let config = SnackBellConfig::default();
        let store = seeded_store();
        let scheduler = ReminderScheduler::from_config(
            &config,
            store.clone(),
            None,
            Arc::new(SlowTransport),
        )
        .unwrap();
        let state = State(Arc::new(AppState::new(config, Arc::new(scheduler), store)));

        // The handler future is dropped mid fan-out, as axum does on disconnect.
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(30),
            run_reminders(state.clone(), HeaderMap::new()),
        )
        .await;
        assert!(waited.is_err());

        state.scheduler.drain().await;
        let history = reminder_history(state).await.0;
        let runs = history["runs"].as_array().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0]["delivered"], 1);
        assert_eq!(runs[0]["partial"], false);
    }

    #[tokio::test]
    async fn test_manual_run_query_failure_is_bad_gateway() {
        let config = SnackBellConfig::default();
        let schedule = Schedule::from_config(&config.reminder).unwrap();
        let scheduler = ReminderScheduler::new(
            schedule,
            Arc::new(BrokenStore),
            PushDispatcher::new(Arc::new(DryRunTransport), 2),
        );
        let state = State(Arc::new(AppState::new(
            config,
            Arc::new(scheduler),
            seeded_store(),
        )));

        let (status, Json(json)) = run_reminders(state, HeaderMap::new()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(json["error"].as_str().unwrap().contains("database is locked"));
    }

    #[tokio::test]
    async fn test_next_reminder() {
        let json = next_reminder(test_state()).await.0;
        assert_eq!(json["timezone"], "Europe/Amsterdam");
        assert!(json["in_secs"].as_i64().unwrap() > 0);
        assert!(json["schedule"].as_str().unwrap().starts_with("Fri 11:00"));
    }

    #[tokio::test]
    async fn test_deregister_endpoints() {
        let state = test_state();
        let (status, Json(json)) = deregister_endpoints(
            state.clone(),
            Json(serde_json::json!({"subscriber_ids": ["u1", "u2", "nobody"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["requested"], 3);
        assert_eq!(json["removed"], 1);
        assert_eq!(state.store.stats().unwrap().subscribed_users, 0);

        let (status, _) =
            deregister_endpoints(state, Json(serde_json::json!({"subscriber_ids": "u1"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // ---- Router + auth ----

    fn get(uri: &str, token: Option<&str>) -> axum::http::Request<axum::body::Body> {
        let mut req = axum::http::Request::builder().uri(uri);
        if let Some(token) = token {
            req = req.header("X-Admin-Token", token);
        }
        req.body(axum::body::Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_admin_routes_require_token() {
        let app = build_router(app_state(Some("letmein")));

        let resp = app
            .clone()
            .oneshot(get("/api/v1/reminders/next", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .clone()
            .oneshot(get("/api/v1/reminders/next", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .clone()
            .oneshot(get("/api/v1/reminders/next", Some("letmein")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // Public routes stay open
        let resp = app.oneshot(get("/api/health", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_no_token_configured_leaves_admin_open() {
        let app = build_router(app_state(None));
        let resp = app
            .oneshot(get("/api/v1/reminders/history", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
