// =============================================================================
// HTTP surface — router construction
// =============================================================================
//
// Public: webhook ingress, health/status, heartbeat, most of the admin
// read surface. Authenticated: the executor-facing /api/signals routes
// (Bearer API key) and the kill-switch toggle (admin password in body).
// =============================================================================

pub mod admin;
pub mod auth;
pub mod health;
pub mod signals;
pub mod webhook;


use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

/// Build the full router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Ingress ─────────────────────────────────────────────────
        .route("/webhook", post(webhook::receive_webhook))
        .route("/webhook/test", post(webhook::test_webhook))
        // ── Dispatch API (Bearer API key) ───────────────────────────
        .route("/api/signals/pending", get(signals::get_pending_signals))
        .route("/api/signals/:id", get(signals::get_signal_by_id))
        .route("/api/signals/:id/ack", post(signals::acknowledge_signal))
        .route("/api/signals/:id/executed", post(signals::report_execution))
        .route("/api/signals/:id/failed", post(signals::report_failure))
        // ── Liveness & status ───────────────────────────────────────
        .route("/heartbeat", post(admin::receive_heartbeat))
        .route("/status", get(health::get_status))
        .route("/health", get(health::health_check))
        // ── Admin ───────────────────────────────────────────────────
        .route("/api/admin/kill-switch", post(admin::toggle_kill_switch))
        .route("/api/admin/kill-switch/status", get(admin::kill_switch_status))
        .route(
            "/api/admin/cooldowns",
            get(admin::list_cooldowns).delete(admin::reset_cooldowns),
        )
        .route("/api/admin/heartbeats", get(admin::list_heartbeats))
        // ── Middleware & state ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}
