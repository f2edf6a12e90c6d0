// =============================================================================
// Admin surface — kill switch, cooldown management, client liveness
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::types::AlertLevel;

// =============================================================================
// Kill switch
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct KillSwitchRequest {
    pub password: String,
    /// true enables trading (deactivates the switch); false halts it.
    pub enabled: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn toggle_kill_switch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<KillSwitchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.password != state.settings.security.admin_password {
        warn!("kill switch toggle rejected: invalid admin password");
        return Err(ApiError::Unauthorized("Invalid admin password".to_string()));
    }

    let message = if request.enabled {
        state.kill_switch.deactivate("admin").await?;
        "Trading enabled".to_string()
    } else {
        let reason = request
            .reason
            .clone()
            .unwrap_or_else(|| "Manual activation by admin".to_string());
        state.kill_switch.activate("admin", &reason).await?;
        state.notifier.dispatch(
            AlertLevel::Critical,
            "kill switch activated",
            vec![
                ("activated by".to_string(), "admin".to_string()),
                ("reason".to_string(), reason.clone()),
            ],
        );
        format!("Trading disabled: {reason}")
    };

    Ok(Json(json!({
        "status": "success",
        "trading_enabled": request.enabled,
        "message": message,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

pub async fn kill_switch_status(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.kill_switch.status().await?;

    let message = if status.trading_enabled {
        "Trading enabled".to_string()
    } else {
        format!(
            "Trading disabled: {}",
            status.reason.as_deref().filter(|r| !r.is_empty()).unwrap_or("Unknown")
        )
    };

    Ok(Json(json!({
        "status": "success",
        "trading_enabled": status.trading_enabled,
        "kill_switch": status,
        "message": message,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

// =============================================================================
// Cooldowns
// =============================================================================

pub async fn list_cooldowns(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cooldowns = state.cooldowns.active();

    let entries: Vec<_> = cooldowns
        .iter()
        .map(|c| {
            json!({
                "key": c.key,
                "action": c.action,
                "ticker": c.ticker,
                "remaining_seconds": c.remaining_seconds,
                "remaining_minutes": (c.remaining_seconds as f64 / 60.0 * 10.0).round() / 10.0,
            })
        })
        .collect();

    Json(json!({
        "status": "success",
        "count": entries.len(),
        "cooldowns": entries,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CooldownResetParams {
    #[serde(default = "wildcard")]
    pub ticker: String,
    #[serde(default = "wildcard")]
    pub action: String,
}

fn wildcard() -> String {
    "*".to_string()
}

pub async fn reset_cooldowns(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CooldownResetParams>,
) -> impl IntoResponse {
    let removed = state.cooldowns.reset(&params.ticker, &params.action);

    Json(json!({
        "status": "success",
        "message": format!(
            "Cooldown reset for ticker={}, action={}", params.ticker, params.action
        ),
        "removed": removed,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// =============================================================================
// Heartbeats
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub client_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

pub async fn receive_heartbeat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let at = request.timestamp.unwrap_or_else(Utc::now);
    state.heartbeats.record(&request.client_id, at).await?;

    debug!(client_id = %request.client_id, "heartbeat received");
    Ok(Json(json!({
        "status": "success",
        "message": format!("Heartbeat acknowledged for {}", request.client_id),
    })))
}

pub async fn list_heartbeats(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let timeout = state.settings.heartbeat.timeout_seconds as i64;
    let now = Utc::now();

    let entries: Vec<_> = state
        .heartbeats
        .all()
        .await?
        .iter()
        .map(|hb| {
            let seconds_since_last = (now - hb.last_heartbeat).num_seconds().max(0);
            json!({
                "client_id": hb.client_id,
                "last_heartbeat": hb.last_heartbeat.to_rfc3339(),
                "status": if seconds_since_last < timeout { "active" } else { "inactive" },
                "seconds_since_last": seconds_since_last,
            })
        })
        .collect();

    info!(count = entries.len(), "heartbeat listing served");
    Ok(Json(json!({
        "status": "success",
        "count": entries.len(),
        "heartbeats": entries,
    })))
}
