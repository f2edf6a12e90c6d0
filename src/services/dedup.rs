// =============================================================================
// Dedup gate — webhook idempotency over the ephemeral store
// =============================================================================
//
// Charting platforms deliver webhooks at-least-once. The first delivery of a
// (timestamp, ticker, action) triple processes normally and caches its reply;
// replays within the TTL get the cached reply back verbatim.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::ephemeral::TtlStore;

/// How long a processed webhook's reply stays replayable.
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct DedupService {
    store: Arc<TtlStore>,
}

impl DedupService {
    pub fn new(store: Arc<TtlStore>) -> Self {
        Self { store }
    }

    /// `idempotency:<sha256(timestamp|ticker|action)>`
    pub fn idempotency_key(timestamp: &str, ticker: &str, action: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{timestamp}|{ticker}|{action}").as_bytes());
        format!("idempotency:{}", hex::encode(hasher.finalize()))
    }

    /// The cached reply for a replayed webhook, if any.
    pub fn cached_reply(&self, key: &str) -> Option<serde_json::Value> {
        let raw = self.store.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => {
                info!(key, "duplicate webhook — replaying cached reply");
                Some(value)
            }
            Err(_) => None,
        }
    }

    /// Cache the reply after the signal has been fully persisted.
    pub fn mark_processed(&self, key: &str, reply: &serde_json::Value) {
        self.store.set(key, &reply.to_string(), IDEMPOTENCY_TTL);
        debug!(key, "webhook reply cached for replay");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_stable_and_input_sensitive() {
        let a = DedupService::idempotency_key("1735279200000", "7203", "buy");
        let b = DedupService::idempotency_key("1735279200000", "7203", "buy");
        let c = DedupService::idempotency_key("1735279200000", "7203", "sell");
        let d = DedupService::idempotency_key("1735279200001", "7203", "buy");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.starts_with("idempotency:"));
        // sha256 hex digest after the prefix.
        assert_eq!(a.len(), "idempotency:".len() + 64);
    }

    #[test]
    fn replay_returns_the_cached_body() {
        let svc = DedupService::new(Arc::new(TtlStore::new()));
        let key = DedupService::idempotency_key("t", "7203", "buy");

        assert!(svc.cached_reply(&key).is_none());

        let reply = json!({
            "status": "success",
            "signal_id": "sig_20250602_100000_7203_buy",
            "message": "Signal received and queued",
        });
        svc.mark_processed(&key, &reply);

        assert_eq!(svc.cached_reply(&key), Some(reply));
    }
}
