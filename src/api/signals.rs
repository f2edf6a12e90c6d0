// =============================================================================
// Dispatch API — the poll side of the relay
// =============================================================================
//
// The executor polls /api/signals/pending, acknowledges what it received,
// then reports each order as executed or failed. All routes require the
// Bearer API key.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::api::auth::ApiKeyAuth;
use crate::app_state::AppState;
use crate::error::ApiError;
use crate::services::reconciler::FillReport;
use crate::services::validation::ValidationOutcome;
use crate::store::signals::SignalRecord;
use crate::types::{AlertLevel, SignalState};

// =============================================================================
// Wire shapes
// =============================================================================

/// Pending-list element; also the by-id lookup response.
#[derive(Debug, Serialize)]
pub struct SignalResponse {
    pub signal_id: String,
    pub action: String,
    pub ticker: String,
    pub quantity: i64,
    pub price: String,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub atr: Option<f64>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub checksum: String,
}

impl From<&SignalRecord> for SignalResponse {
    fn from(s: &SignalRecord) -> Self {
        Self {
            signal_id: s.signal_id.clone(),
            action: s.action.clone(),
            ticker: s.ticker.clone(),
            quantity: s.quantity,
            price: s.price.clone(),
            entry_price: s.entry_price,
            stop_loss: s.stop_loss,
            take_profit: s.take_profit,
            atr: s.atr,
            state: s.state.clone(),
            created_at: s.created_at,
            expires_at: s.expires_at,
            checksum: s.checksum.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub client_id: String,
    pub checksum: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionRequest {
    pub client_id: String,
    pub execution_price: f64,
    pub execution_quantity: i64,
    pub order_id: String,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct FailureRequest {
    pub client_id: String,
    pub error: String,
}

// =============================================================================
// Poll pending
// =============================================================================

/// Validated PENDING backlog in insertion order; 204 when nothing survives
/// the gauntlet. Failing signals transition to FAILED here.
pub async fn get_pending_signals(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let pending = state.signals.pending(now).await?;

    if pending.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let mut validated = Vec::new();
    for signal in &pending {
        match state.validator.validate(signal, now).await? {
            ValidationOutcome::Pass { .. } => validated.push(SignalResponse::from(signal)),
            ValidationOutcome::Rejected { reason, .. } => {
                state
                    .signals
                    .mark_failed(
                        &signal.signal_id,
                        &format!("pre-dispatch validation failed: {reason}"),
                    )
                    .await?;
            }
        }
    }

    if validated.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    info!(count = validated.len(), "pending signals dispatched to executor");
    Ok(Json(json!({
        "status": "success",
        "timestamp": now.to_rfc3339(),
        "count": validated.len(),
        "signals": validated,
    }))
    .into_response())
}

// =============================================================================
// Acknowledge
// =============================================================================

pub async fn acknowledge_signal(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Path(signal_id): Path<String>,
    Json(request): Json<AcknowledgeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signal = state
        .signals
        .find(&signal_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("signal {signal_id} not found")))?;

    if signal.checksum != request.checksum {
        error!(signal_id = %signal_id, "checksum mismatch on acknowledge");
        return Err(ApiError::ChecksumMismatch(signal_id));
    }

    // Idempotent re-ack: same reply, original fetched_at.
    if signal.signal_state() == SignalState::Fetched {
        info!(signal_id = %signal_id, "signal already acknowledged");
        return Ok(Json(json!({
            "status": "success",
            "signal_id": signal_id,
            "state": "fetched",
            "acknowledged_at": signal.fetched_at,
        })));
    }

    let now = Utc::now();
    if !state.signals.mark_fetched(&signal_id, &request.client_id, now).await? {
        // Either a concurrent ack won (idempotent success) or the signal
        // reached a terminal state first. Re-read to tell them apart.
        let current = state
            .signals
            .find(&signal_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("signal {signal_id} not found")))?;
        if current.signal_state() == SignalState::Fetched {
            return Ok(Json(json!({
                "status": "success",
                "signal_id": signal_id,
                "state": "fetched",
                "acknowledged_at": current.fetched_at,
            })));
        }
        return Err(ApiError::Conflict(format!(
            "signal {signal_id} is {} and cannot be acknowledged",
            current.state
        )));
    }

    info!(signal_id = %signal_id, client_id = %request.client_id, "signal acknowledged");
    Ok(Json(json!({
        "status": "success",
        "signal_id": signal_id,
        "state": "fetched",
        "acknowledged_at": now,
    })))
}

// =============================================================================
// Report executed
// =============================================================================

pub async fn report_execution(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Path(signal_id): Path<String>,
    Json(request): Json<ExecutionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.execution_price <= 0.0 {
        return Err(ApiError::Validation("execution_price must be positive".to_string()));
    }
    if request.execution_quantity <= 0 {
        return Err(ApiError::Validation("execution_quantity must be positive".to_string()));
    }

    let signal = state
        .signals
        .find(&signal_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("signal {signal_id} not found")))?;

    if signal.signal_state() == SignalState::Executed {
        warn!(signal_id = %signal_id, "duplicate execution report");
        return Err(ApiError::Conflict(format!("signal {signal_id} already executed")));
    }

    let now = Utc::now();
    let report = FillReport {
        client_id: request.client_id.clone(),
        execution_price: request.execution_price,
        execution_quantity: request.execution_quantity,
        order_id: request.order_id.clone(),
        executed_at: request.executed_at.unwrap_or(now),
    };

    let outcome = state
        .reconciler
        .apply_fill(&signal, &report, &state.market_hours, now)
        .await?;

    info!(
        signal_id = %signal_id,
        order_id = %request.order_id,
        ticker = %signal.ticker,
        execution_price = request.execution_price,
        quantity = request.execution_quantity,
        "order executed"
    );

    // Post-fill risk consequences: auto kill-switch and dynamic blacklist.
    let consequences = state
        .risk
        .after_fill(&signal.ticker, &outcome.stats, outcome.is_win == Some(false))
        .await?;

    if let Some(reason) = &consequences.auto_kill_reason {
        state.notifier.dispatch(
            AlertLevel::Critical,
            "kill switch auto-activated",
            vec![
                ("reason".to_string(), reason.clone()),
                ("trigger signal".to_string(), signal_id.clone()),
            ],
        );
    }
    if let Some(ticker) = &consequences.blacklisted_ticker {
        state.notifier.dispatch(
            AlertLevel::Warning,
            "ticker dynamically blacklisted",
            vec![("ticker".to_string(), ticker.clone())],
        );
    }

    Ok(Json(json!({
        "status": "success",
        "signal_id": signal_id,
        "state": "executed",
        "execution_logged": true,
    })))
}

// =============================================================================
// Report failed
// =============================================================================

pub async fn report_failure(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Path(signal_id): Path<String>,
    Json(request): Json<FailureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let signal = state
        .signals
        .find(&signal_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("signal {signal_id} not found")))?;

    state.signals.mark_failed(&signal_id, &request.error).await?;

    error!(
        signal_id = %signal_id,
        client_id = %request.client_id,
        error = %request.error,
        "signal execution failed"
    );
    state.notifier.dispatch(
        AlertLevel::Error,
        "signal execution failed",
        vec![
            ("signal".to_string(), signal_id.clone()),
            ("ticker".to_string(), signal.ticker.clone()),
            ("error".to_string(), request.error.clone()),
        ],
    );

    Ok(Json(json!({
        "status": "failure_recorded",
        "message": format!("Signal {signal_id} marked as failed"),
    })))
}

// =============================================================================
// Lookup by id
// =============================================================================

/// Recovery helper for an executor restarting after its own crash.
pub async fn get_signal_by_id(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Path(signal_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let signal = state
        .signals
        .find(&signal_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("signal {signal_id} not found")))?;

    Ok(Json(SignalResponse::from(&signal)))
}
