//! HTTP server implementation using Axum.

use axum::response::IntoResponse;
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use snackbell_core::config::{GatewayConfig, SnackBellConfig};
use snackbell_scheduler::{ReminderScheduler, SubscriberDb};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub config: SnackBellConfig,
    pub start_time: std::time::Instant,
    /// Required in `X-Admin-Token` for `/api/v1/*` when set.
    pub admin_token: Option<String>,
    pub scheduler: Arc<ReminderScheduler>,
    pub store: Arc<SubscriberDb>,
}

impl AppState {
    pub fn new(
        config: SnackBellConfig,
        scheduler: Arc<ReminderScheduler>,
        store: Arc<SubscriberDb>,
    ) -> Self {
        Self {
            admin_token: config.gateway.admin_token.clone().filter(|t| !t.is_empty()),
            config,
            start_time: std::time::Instant::now(),
            scheduler,
            store,
        }
    }
}

/// Compare two tokens without an early exit on the first differing byte.
fn tokens_match(provided: &[u8], expected: &[u8]) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Admin token middleware. Validates the X-Admin-Token header.
async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    // No token configured: admin API is open (bind to localhost)
    let Some(expected) = &state.admin_token else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get("X-Admin-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if tokens_match(provided.as_bytes(), expected.as_bytes()) {
        return next.run(req).await;
    }

    tracing::warn!("🔒 Rejected admin request to {} (bad token)", req.uri().path());
    (
        axum::http::StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"ok": false, "error": "Unauthorized: invalid or missing admin token"})),
    )
        .into_response()
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    // Admin routes: require X-Admin-Token when configured
    let protected = Router::new()
        .route("/api/v1/reminders/run", post(super::routes::run_reminders))
        .route("/api/v1/reminders/next", get(super::routes::next_reminder))
        .route("/api/v1/reminders/history", get(super::routes::reminder_history))
        .route(
            "/api/v1/reminders/deregister",
            post(super::routes::deregister_endpoints),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_admin,
        ));

    // Public routes, used by the PWA
    let public = Router::new()
        .route("/api/health", get(super::routes::health_check))
        .route(
            "/api/notifications/vapid-key",
            get(super::routes::vapid_key),
        )
        .route(
            "/api/notifications/preferences",
            post(super::routes::update_preferences),
        )
        .route(
            "/api/notifications/status",
            get(super::routes::notification_status),
        );

    protected
        .merge(public)
        .layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .allow_origin(Any)
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server; returns once `shutdown` fires and in-flight requests drain.
pub async fn start(
    config: &GatewayConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if state.admin_token.is_none() {
        tracing::warn!("⚠️ gateway.admin_token not set, admin API is unauthenticated");
    }
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    tracing::info!("🛑 Gateway server stopped");
    Ok(())
}
