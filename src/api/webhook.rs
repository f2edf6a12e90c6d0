// =============================================================================
// Webhook ingress — the push side of the relay
// =============================================================================
//
// POST /webhook runs the full ingress gauntlet in order:
//   shape -> passphrase -> dedup -> market hours -> cooldown -> position
//   (sells) -> persist PENDING -> audit -> arm cooldowns -> cached reply.
//
// POST /webhook/test performs only the shape and passphrase checks and has
// no side effects.
//
// The body is shape-validated by hand rather than through serde rejection so
// every failure renders the VALIDATION_ERROR envelope with the offending
// field named.
// =============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Json, State},
    response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::services::cooldown::CooldownVerdict;
use crate::services::csv_log::AuditLine;
use crate::services::dedup::DedupService;
use crate::services::market_hours::MarketDecision;
use crate::store::signals::{InsertOutcome, SignalRecord};
use crate::types::{SignalAction, SignalState};

// =============================================================================
// Payload parsing
// =============================================================================

#[derive(Debug, Clone)]
pub struct WebhookPayload {
    pub action: SignalAction,
    pub ticker: String,
    pub quantity: i64,
    pub price: String,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub atr: Option<f64>,
    pub rr_ratio: Option<f64>,
    pub rsi: Option<f64>,
    pub timestamp: String,
    pub passphrase: String,
}

fn required_str(body: &Value, field: &str) -> Result<String, ApiError> {
    match body.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        // Charting platforms sometimes render numeric template fields as
        // numbers; accept them where a string is expected.
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(ApiError::Validation(format!("field '{field}' must be a string"))),
        None => Err(ApiError::Validation(format!("missing required field '{field}'"))),
    }
}

fn optional_f64(body: &Value, field: &str) -> Result<Option<f64>, ApiError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_f64() {
            Some(x) if x > 0.0 => Ok(Some(x)),
            _ => Err(ApiError::Validation(format!(
                "field '{field}' must be a positive number"
            ))),
        },
    }
}

pub fn parse_payload(body: &Value) -> Result<WebhookPayload, ApiError> {
    let action_raw = required_str(body, "action")?;
    let action = SignalAction::parse(&action_raw).ok_or_else(|| {
        ApiError::Validation(format!("field 'action' must be 'buy' or 'sell' (got '{action_raw}')"))
    })?;

    let ticker = required_str(body, "ticker")?;
    if !crate::services::validation::ticker_is_valid(&ticker) {
        return Err(ApiError::Validation(format!(
            "field 'ticker' must be a 4-digit code (got '{ticker}')"
        )));
    }

    let quantity = match body.get("quantity") {
        None => {
            return Err(ApiError::Validation("missing required field 'quantity'".to_string()))
        }
        Some(v) => v.as_i64().ok_or_else(|| {
            ApiError::Validation("field 'quantity' must be an integer".to_string())
        })?,
    };
    if quantity <= 0 {
        return Err(ApiError::Validation(format!(
            "field 'quantity' must be positive (got {quantity})"
        )));
    }

    // required_str already tolerates numeric price template fields.
    let price = match body.get("price") {
        None | Some(Value::Null) => "market".to_string(),
        Some(_) => required_str(body, "price")?,
    };

    let entry_price = body
        .get("entry_price")
        .and_then(Value::as_f64)
        .ok_or_else(|| ApiError::Validation("missing required field 'entry_price'".to_string()))?;
    if entry_price <= 0.0 {
        return Err(ApiError::Validation(format!(
            "field 'entry_price' must be positive (got {entry_price})"
        )));
    }

    Ok(WebhookPayload {
        action,
        ticker,
        quantity,
        price,
        entry_price,
        stop_loss: optional_f64(body, "stop_loss")?,
        take_profit: optional_f64(body, "take_profit")?,
        atr: optional_f64(body, "atr")?,
        rr_ratio: optional_f64(body, "rr_ratio")?,
        rsi: optional_f64(body, "rsi")?,
        timestamp: required_str(body, "timestamp")?,
        passphrase: required_str(body, "passphrase")?,
    })
}

// =============================================================================
// Signal identity
// =============================================================================

/// `sig_<YYYYMMDD_HHMMSS>_<ticker>_<action>`, exchange-local clock.
pub fn generate_signal_id(
    now_local: DateTime<chrono_tz::Tz>,
    ticker: &str,
    action: SignalAction,
) -> String {
    format!("sig_{}_{}_{}", now_local.format("%Y%m%d_%H%M%S"), ticker, action)
}

/// First 16 hex chars of sha256 over the sorted-key compact JSON of the
/// invariant fields. The executor echoes this string back verbatim on ack.
pub fn generate_checksum(
    signal_id: &str,
    action: SignalAction,
    ticker: &str,
    quantity: i64,
    entry_price: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
) -> String {
    // serde_json's default map is ordered, so key sorting comes for free.
    let canonical = json!({
        "signal_id": signal_id,
        "action": action.as_str(),
        "ticker": ticker,
        "quantity": quantity,
        "entry_price": entry_price,
        "stop_loss": stop_loss,
        "take_profit": take_profit,
    })
    .to_string();

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) =
        body.map_err(|e| ApiError::Validation(format!("invalid JSON body: {e}")))?;
    let payload = parse_payload(&body)?;

    // Passphrase.
    if payload.passphrase != state.settings.security.webhook_secret {
        warn!(remote = %remote.ip(), "webhook rejected: invalid passphrase");
        return Err(ApiError::Unauthorized("Invalid passphrase".to_string()));
    }

    // Dedup replay.
    let idempotency_key = DedupService::idempotency_key(
        &payload.timestamp,
        &payload.ticker,
        payload.action.as_str(),
    );
    if let Some(cached) = state.dedup.cached_reply(&idempotency_key) {
        return Ok(Json(cached));
    }

    // Market hours.
    match state.market_hours.decide_now() {
        MarketDecision::Reject { reason } => {
            warn!(ticker = %payload.ticker, reason, "webhook rejected by market-hours gate");
            return Err(ApiError::PolicyRejected {
                code: reason,
                message: format!("Signal rejected: {reason}"),
            });
        }
        // Queued signals are stored as PENDING like accepted ones; the
        // pre-dispatch validator holds them until the safe window.
        MarketDecision::Queue { reason } => {
            info!(ticker = %payload.ticker, reason, "signal queued outside safe window");
        }
        MarketDecision::Accept => {}
    }

    let now = Utc::now();
    let now_local = now.with_timezone(&state.market_hours.timezone());
    let signal_id = generate_signal_id(now_local, &payload.ticker, payload.action);

    // Cooldown.
    if let CooldownVerdict::Blocked { reason, retry_after } =
        state.cooldowns.check(&payload.ticker, payload.action)
    {
        return Err(ApiError::Cooldown { reason, retry_after });
    }

    // Position gate — sells only. The charting platform does not know the
    // account's holdings, so the relay checks them here.
    if payload.action == SignalAction::Sell {
        match state.positions.find(&payload.ticker).await? {
            None => {
                warn!(ticker = %payload.ticker, "sell rejected: no position held");
                return Err(ApiError::PolicyRejected {
                    code: "no_position_to_sell",
                    message: format!("Cannot sell {}: no position held", payload.ticker),
                });
            }
            Some(pos) if pos.quantity < payload.quantity => {
                warn!(
                    ticker = %payload.ticker,
                    held = pos.quantity,
                    requested = payload.quantity,
                    "sell rejected: insufficient position"
                );
                return Err(ApiError::PolicyRejected {
                    code: "insufficient_position",
                    message: format!(
                        "Cannot sell {} shares of {}: only {} shares held",
                        payload.quantity, payload.ticker, pos.quantity
                    ),
                });
            }
            Some(_) => {}
        }
    }

    let checksum = generate_checksum(
        &signal_id,
        payload.action,
        &payload.ticker,
        payload.quantity,
        payload.entry_price,
        payload.stop_loss,
        payload.take_profit,
    );

    let record = SignalRecord {
        signal_id: signal_id.clone(),
        action: payload.action.as_str().to_string(),
        ticker: payload.ticker.clone(),
        quantity: payload.quantity,
        price: payload.price.clone(),
        entry_price: payload.entry_price,
        stop_loss: payload.stop_loss,
        take_profit: payload.take_profit,
        atr: payload.atr,
        rr_ratio: payload.rr_ratio,
        rsi: payload.rsi,
        state: SignalState::Pending.as_str().to_string(),
        fetched_by: None,
        fetched_at: None,
        executed_at: None,
        execution_price: None,
        order_id: None,
        checksum: checksum.clone(),
        error_message: None,
        created_at: now,
        expires_at: now + Duration::minutes(state.settings.signal.expiration_minutes),
    };

    match state.signals.insert_pending(&record).await? {
        InsertOutcome::Inserted => {}
        InsertOutcome::Duplicate => {
            // Both deliveries missed the dedup key; the durable PK resolved
            // the race. Return the winner's reply (same second-resolution id).
            if let Some(cached) = state.dedup.cached_reply(&idempotency_key) {
                return Ok(Json(cached));
            }
            let reply = success_reply(&signal_id);
            return Ok(Json(reply));
        }
    }

    // Audit writers: structured log line + append-only CSV.
    info!(
        signal_id = %signal_id,
        ticker = %payload.ticker,
        action = %payload.action,
        quantity = payload.quantity,
        entry_price = payload.entry_price,
        "signal received"
    );
    state.audit_csv.append(&AuditLine {
        timestamp: now_local.format("%Y-%m-%d %H:%M:%S").to_string(),
        signal_id: signal_id.clone(),
        action: payload.action.as_str().to_string(),
        ticker: payload.ticker.clone(),
        quantity: payload.quantity,
        price: payload.price.clone(),
        entry_price: payload.entry_price,
        stop_loss: payload.stop_loss,
        take_profit: payload.take_profit,
        atr: payload.atr,
        rr_ratio: payload.rr_ratio,
        rsi: payload.rsi,
        checksum: checksum.clone(),
        state: SignalState::Pending.as_str().to_string(),
        source_ip: remote.ip().to_string(),
    });

    // Cooldowns arm only once the signal is durably persisted.
    state.cooldowns.arm(&payload.ticker, payload.action);

    let reply = success_reply(&signal_id);
    state.dedup.mark_processed(&idempotency_key, &reply);

    Ok(Json(reply))
}

fn success_reply(signal_id: &str) -> Value {
    json!({
        "status": "success",
        "signal_id": signal_id,
        "message": "Signal received and queued",
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Dry run: shape + passphrase only, no side effects.
pub async fn test_webhook(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) =
        body.map_err(|e| ApiError::Validation(format!("invalid JSON body: {e}")))?;
    let payload = parse_payload(&body)?;

    if payload.passphrase != state.settings.security.webhook_secret {
        warn!(remote = %remote.ip(), "test webhook rejected: invalid passphrase");
        return Err(ApiError::Unauthorized("Invalid passphrase".to_string()));
    }

    info!(ticker = %payload.ticker, action = %payload.action, "test webhook received");

    Ok(Json(json!({
        "status": "test_success",
        "signal_id": "test_signal_id",
        "message": "Test webhook received successfully (dry run)",
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn body() -> Value {
        json!({
            "action": "buy",
            "ticker": "7203",
            "quantity": 100,
            "price": "market",
            "entry_price": 1850.0,
            "stop_loss": 1800.0,
            "take_profit": 1950.0,
            "timestamp": "1735279200000",
            "passphrase": "hook",
        })
    }

    #[test]
    fn parse_accepts_complete_payload() {
        let p = parse_payload(&body()).unwrap();
        assert_eq!(p.action, SignalAction::Buy);
        assert_eq!(p.ticker, "7203");
        assert_eq!(p.quantity, 100);
        assert_eq!(p.price, "market");
        assert_eq!(p.stop_loss, Some(1800.0));
        assert_eq!(p.atr, None);
    }

    #[test]
    fn parse_defaults_price_to_market() {
        let mut b = body();
        b.as_object_mut().unwrap().remove("price");
        assert_eq!(parse_payload(&b).unwrap().price, "market");
    }

    #[test]
    fn parse_accepts_numeric_timestamp() {
        let mut b = body();
        b["timestamp"] = json!(1735279200000i64);
        assert_eq!(parse_payload(&b).unwrap().timestamp, "1735279200000");
    }

    #[test]
    fn parse_rejects_shape_failures() {
        for (field, value) in [
            ("action", json!("hold")),
            ("ticker", json!("72A3")),
            ("ticker", json!("720")),
            ("quantity", json!(0)),
            ("quantity", json!(-100)),
            ("entry_price", json!(0.0)),
            ("stop_loss", json!(-5.0)),
        ] {
            let mut b = body();
            b[field] = value;
            let err = parse_payload(&b).unwrap_err();
            assert!(matches!(err, ApiError::Validation(_)), "field {field} should fail shape");
        }

        for field in ["action", "ticker", "quantity", "entry_price", "timestamp", "passphrase"] {
            let mut b = body();
            b.as_object_mut().unwrap().remove(field);
            assert!(parse_payload(&b).is_err(), "missing {field} should fail shape");
        }
    }

    #[test]
    fn signal_id_format() {
        let local = chrono_tz::Asia::Tokyo.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
        let id = generate_signal_id(local, "7203", SignalAction::Buy);
        assert_eq!(id, "sig_20250602_100000_7203_buy");
    }

    #[test]
    fn checksum_is_16_lowercase_hex() {
        let sum = generate_checksum(
            "sig_20250602_100000_7203_buy",
            SignalAction::Buy,
            "7203",
            100,
            1850.0,
            Some(1800.0),
            Some(1950.0),
        );
        assert_eq!(sum.len(), 16);
        assert!(sum.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn checksum_is_deterministic_and_field_sensitive() {
        let base = || {
            generate_checksum(
                "sig_x", SignalAction::Buy, "7203", 100, 1850.0, Some(1800.0), None,
            )
        };
        assert_eq!(base(), base());

        let other = generate_checksum(
            "sig_x", SignalAction::Buy, "7203", 200, 1850.0, Some(1800.0), None,
        );
        assert_ne!(base(), other);

        let other = generate_checksum(
            "sig_x", SignalAction::Sell, "7203", 100, 1850.0, Some(1800.0), None,
        );
        assert_ne!(base(), other);
    }

    #[test]
    fn checksum_canonical_form_is_sorted_and_compact() {
        // Locks the canonicalization: alphabetical keys, no whitespace,
        // null for absent optionals.
        let canonical = json!({
            "signal_id": "sig_x",
            "action": "buy",
            "ticker": "7203",
            "quantity": 100,
            "entry_price": 1850.0,
            "stop_loss": Option::<f64>::None,
            "take_profit": Option::<f64>::None,
        })
        .to_string();
        assert_eq!(
            canonical,
            r#"{"action":"buy","entry_price":1850.0,"quantity":100,"signal_id":"sig_x","stop_loss":null,"take_profit":null,"ticker":"7203"}"#
        );
    }
}
