// =============================================================================
// Health and status endpoints (public)
// =============================================================================

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::store::daily_stats::DailyStatsRow;

/// Store-level liveness: the durable pool answers a probe query; the
/// ephemeral store reports its live key count.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match state.db.ping().await {
        Ok(()) => "OK".to_string(),
        Err(e) => format!("ERROR: {e}"),
    };
    let ephemeral_keys = state.ephemeral.len();

    let overall = if database == "OK" { "healthy" } else { "unhealthy" };

    Json(json!({
        "status": overall,
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "ephemeral_store": { "status": "OK", "keys": ephemeral_keys },
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

/// Operational status: trading flag, market session, today's stats and
/// exposure against the configured limits.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let trading_enabled = state.kill_switch.is_trading_enabled().await?;
    let market = state.market_hours.status();

    let today = state.market_hours.local_date(Utc::now());
    let stats = state
        .daily_stats
        .for_date(today)
        .await?
        .unwrap_or_else(|| DailyStatsRow::empty(&today.format("%Y-%m-%d").to_string()));

    let risk_metrics = state.risk.metrics(stats.entry_count).await?;

    Ok(Json(json!({
        "status": if trading_enabled { "active" } else { "disabled" },
        "trading_enabled": trading_enabled,
        "market_open": market.is_safe_trading_window,
        "market": market,
        "daily_stats": {
            "entry_count": stats.entry_count,
            "exit_count": stats.exit_count,
            "total_trades": stats.total_trades,
            "total_pnl": stats.total_pnl,
            "consecutive_losses": stats.consecutive_losses,
            "error_count": stats.error_count,
        },
        "risk_metrics": risk_metrics,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}
