// =============================================================================
// API error taxonomy — every handler failure renders the same JSON envelope
// =============================================================================
//
// Envelope shape (all 4xx/5xx):
//
//   { "status": "error", "error_code": "...", "error_message": "...",
//     "details": ..., "timestamp": "..." }
//
// Cooldown rejections additionally carry `retry_after` (seconds).
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Domain error for every HTTP handler in the relay.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request shape is wrong: missing field, bad ticker format, non-positive
    /// quantity, unparsable action.
    #[error("{0}")]
    Validation(String),

    /// Passphrase, API key or admin password mismatch.
    #[error("{0}")]
    Unauthorized(String),

    /// Unknown signal_id (or other missing resource).
    #[error("{0}")]
    NotFound(String),

    /// A safety gate said no: market hours, blacklist, missing position.
    /// `code` is the stable machine-readable reason.
    #[error("{message}")]
    PolicyRejected { code: &'static str, message: String },

    /// Cooldown gate rejection; the caller may retry after `retry_after`
    /// seconds.
    #[error("cooldown active: {reason}")]
    Cooldown { reason: &'static str, retry_after: u64 },

    /// State conflict, e.g. a second executed-report for the same signal.
    #[error("{0}")]
    Conflict(String),

    /// Checksum echoed by the executor does not match the stored one.
    #[error("checksum mismatch for signal {0}")]
    ChecksumMismatch(String),

    /// Durable-store failure or broken invariant. Never exposes internals to
    /// the caller.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        Self::Internal(anyhow::Error::new(e).context("durable store operation failed"))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::PolicyRejected { .. } | Self::ChecksumMismatch(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Cooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::PolicyRejected { code, .. } => code,
            Self::Cooldown { .. } => "COOLDOWN_ACTIVE",
            Self::Conflict(_) => "ALREADY_EXECUTED",
            Self::ChecksumMismatch(_) => "CHECKSUM_MISMATCH",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal failures are logged with their full chain; the caller only
        // sees the generic envelope.
        let message = match &self {
            Self::Internal(e) => {
                error!(error = ?e, "internal server error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "status": "error",
            "error_code": self.error_code(),
            "error_message": message,
            "timestamp": Utc::now().to_rfc3339(),
        });

        if let Self::Cooldown { retry_after, reason } = &self {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("retry_after".into(), json!(retry_after));
                obj.insert("details".into(), json!({ "reason": reason }));
            }
        }

        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Cooldown { reason: "cooldown_same_ticker", retry_after: 10 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn policy_rejection_keeps_stable_code() {
        let e = ApiError::PolicyRejected {
            code: "MARKET_CLOSED",
            message: "Signal rejected: market_closed".into(),
        };
        assert_eq!(e.error_code(), "MARKET_CLOSED");
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
    }
}
