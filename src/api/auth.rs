// =============================================================================
// Bearer API-key authentication — axum extractor
// =============================================================================
//
// Validates `Authorization: Bearer <key>` against the configured API key for
// the executor-facing /api/signals surface. Comparison is constant time; a
// missing or wrong key short-circuits with the 401 error envelope before the
// handler body runs.
// =============================================================================

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use crate::app_state::AppState;
use crate::error::ApiError;

/// Compare two byte slices in constant time. Always examines every byte so a
/// prefix match is not observable through timing.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Extractor yielding proof that the caller holds the executor API key.
pub struct ApiKeyAuth;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ApiKeyAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let expected = state.settings.security.api_key.as_bytes();

        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match auth_header {
            Some(value) if value.starts_with("Bearer ") => &value[7..],
            _ => {
                warn!("missing or malformed Authorization header");
                return Err(ApiError::Unauthorized(
                    "Invalid authorization header".to_string(),
                ));
            }
        };

        if !constant_time_eq(token.as_bytes(), expected) {
            warn!("invalid API key presented");
            return Err(ApiError::Unauthorized("Invalid API key".to_string()));
        }

        Ok(ApiKeyAuth)
    }
}

// =============================================================================
// Tests
// =============================================================================
