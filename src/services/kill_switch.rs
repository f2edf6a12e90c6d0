// =============================================================================
// Kill switch — the global trading_enabled flag
// =============================================================================
//
// Backed by the system_state table so a restart keeps the operator's
// decision. Activation records who, why and when.
// =============================================================================

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::store::system_state::SystemStateStore;

const KEY_TRADING_ENABLED: &str = "trading_enabled";
const KEY_REASON: &str = "kill_switch_reason";
const KEY_ACTIVATED_AT: &str = "kill_switch_activated_at";
const KEY_ACTIVATED_BY: &str = "kill_switch_activated_by";

#[derive(Debug, Clone, Serialize)]
pub struct KillSwitchStatus {
    pub trading_enabled: bool,
    pub kill_switch_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_by: Option<String>,
}

#[derive(Clone)]
pub struct KillSwitchService {
    state: SystemStateStore,
}

impl KillSwitchService {
    pub fn new(state: SystemStateStore) -> Self {
        Self { state }
    }

    /// Trading defaults to enabled; the first read seeds the flag.
    pub async fn is_trading_enabled(&self) -> Result<bool, ApiError> {
        match self.state.get(KEY_TRADING_ENABLED).await? {
            Some(value) => Ok(value.eq_ignore_ascii_case("true")),
            None => {
                self.state.set(KEY_TRADING_ENABLED, "true", "bool").await?;
                Ok(true)
            }
        }
    }

    /// Disable trading. `activated_by` is "admin" for the manual path and
    /// "auto_trigger" when a risk predicate fires.
    pub async fn activate(&self, activated_by: &str, reason: &str) -> Result<(), ApiError> {
        self.state.set(KEY_TRADING_ENABLED, "false", "bool").await?;
        self.state.set(KEY_REASON, reason, "string").await?;
        self.state
            .set(KEY_ACTIVATED_AT, &Utc::now().to_rfc3339(), "string")
            .await?;
        self.state.set(KEY_ACTIVATED_BY, activated_by, "string").await?;

        warn!(activated_by, reason, "KILL SWITCH ACTIVATED — trading halted");
        Ok(())
    }

    pub async fn deactivate(&self, deactivated_by: &str) -> Result<(), ApiError> {
        self.state.set(KEY_TRADING_ENABLED, "true", "bool").await?;
        self.state.set(KEY_REASON, "", "string").await?;

        info!(deactivated_by, "kill switch deactivated — trading enabled");
        Ok(())
    }

    pub async fn status(&self) -> Result<KillSwitchStatus, ApiError> {
        let enabled = self.is_trading_enabled().await?;

        if enabled {
            return Ok(KillSwitchStatus {
                trading_enabled: true,
                kill_switch_active: false,
                reason: None,
                activated_at: None,
                activated_by: None,
            });
        }

        Ok(KillSwitchStatus {
            trading_enabled: false,
            kill_switch_active: true,
            reason: self.state.get(KEY_REASON).await?,
            activated_at: self.state.get(KEY_ACTIVATED_AT).await?,
            activated_by: self.state.get(KEY_ACTIVATED_BY).await?,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn service() -> KillSwitchService {
        let db = Database::connect_in_memory().await.unwrap();
        KillSwitchService::new(SystemStateStore::new(db.pool.clone()))
    }

    #[tokio::test]
    async fn defaults_to_enabled() {
        let svc = service().await;
        assert!(svc.is_trading_enabled().await.unwrap());

        let status = svc.status().await.unwrap();
        assert!(status.trading_enabled);
        assert!(!status.kill_switch_active);
        assert!(status.reason.is_none());
    }

    #[tokio::test]
    async fn activate_records_actor_and_reason() {
        let svc = service().await;

        svc.activate("auto_trigger", "consecutive losses exceeded").await.unwrap();
        assert!(!svc.is_trading_enabled().await.unwrap());

        let status = svc.status().await.unwrap();
        assert!(status.kill_switch_active);
        assert_eq!(status.activated_by.as_deref(), Some("auto_trigger"));
        assert_eq!(status.reason.as_deref(), Some("consecutive losses exceeded"));
        assert!(status.activated_at.is_some());

        svc.deactivate("admin").await.unwrap();
        assert!(svc.is_trading_enabled().await.unwrap());
    }
}
