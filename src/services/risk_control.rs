// =============================================================================
// Risk controller — post-fill accounting consequences
// =============================================================================
//
// Runs after every reconciled fill:
//   - auto-activates the kill switch when a daily predicate fires
//     (consecutive losses, daily loss floor, trade-count cap);
//   - dynamically blacklists a ticker on a losing streak.
//
// Also computes the exposure metrics served by /status.
// =============================================================================

use serde::Serialize;
use tracing::warn;

use crate::config::RiskControlConfig;
use crate::error::ApiError;
use crate::services::kill_switch::KillSwitchService;
use crate::store::blacklist::BlacklistStore;
use crate::store::daily_stats::DailyStatsRow;
use crate::store::executions::ExecutionStore;
use crate::store::positions::PositionStore;

#[derive(Debug, Clone, Serialize)]
pub struct RiskMetrics {
    pub total_exposure: f64,
    pub max_total_exposure: f64,
    pub exposure_utilization_pct: f64,
    pub open_positions: i64,
    pub max_open_positions: u32,
    pub daily_entries: i64,
    pub max_daily_entries: u32,
}

/// What the post-fill pass decided, surfaced so the handler can notify.
#[derive(Debug, Default)]
pub struct FillConsequences {
    pub auto_kill_reason: Option<String>,
    pub blacklisted_ticker: Option<String>,
}

#[derive(Clone)]
pub struct RiskControlService {
    kill_switch: KillSwitchService,
    blacklist: BlacklistStore,
    executions: ExecutionStore,
    positions: PositionStore,
    config: RiskControlConfig,
}

impl RiskControlService {
    pub fn new(
        kill_switch: KillSwitchService,
        blacklist: BlacklistStore,
        executions: ExecutionStore,
        positions: PositionStore,
        config: RiskControlConfig,
    ) -> Self {
        Self { kill_switch, blacklist, executions, positions, config }
    }

    /// Evaluate the auto-kill and dynamic-blacklist consequences of a fill.
    pub async fn after_fill(
        &self,
        ticker: &str,
        stats: &DailyStatsRow,
        fill_was_loss: bool,
    ) -> Result<FillConsequences, ApiError> {
        let mut consequences = FillConsequences::default();

        if let Some(reason) = auto_kill_reason(&self.config, stats) {
            // Only trip once; repeated fills while halted stay quiet.
            if self.kill_switch.is_trading_enabled().await? {
                warn!(reason = %reason, "auto kill-switch predicate fired");
                self.kill_switch.activate("auto_trigger", &reason).await?;
                consequences.auto_kill_reason = Some(reason);
            }
        }

        if fill_was_loss {
            let streak = self.executions.consecutive_losses(ticker).await?;
            if streak >= self.config.dynamic_blacklist_losses
                && self.blacklist.add_for_loss_streak(ticker, streak).await?
            {
                consequences.blacklisted_ticker = Some(ticker.to_string());
            }
        }

        Ok(consequences)
    }

    pub async fn metrics(&self, daily_entries: i64) -> Result<RiskMetrics, ApiError> {
        let total_exposure = self.positions.total_exposure().await?;
        let open_positions = self.positions.open_count().await?;
        let utilization = if self.config.max_total_exposure > 0.0 {
            total_exposure / self.config.max_total_exposure * 100.0
        } else {
            0.0
        };

        Ok(RiskMetrics {
            total_exposure,
            max_total_exposure: self.config.max_total_exposure,
            exposure_utilization_pct: utilization,
            open_positions,
            max_open_positions: self.config.max_open_positions,
            daily_entries,
            max_daily_entries: self.config.max_daily_entries,
        })
    }
}

/// The three auto-kill predicates over today's stats.
pub fn auto_kill_reason(config: &RiskControlConfig, stats: &DailyStatsRow) -> Option<String> {
    if stats.consecutive_losses >= i64::from(config.max_consecutive_losses) {
        return Some(format!(
            "consecutive losses reached {} (limit {})",
            stats.consecutive_losses, config.max_consecutive_losses
        ));
    }
    if stats.total_pnl <= config.max_daily_loss {
        return Some(format!(
            "daily loss {} breached floor {}",
            stats.total_pnl, config.max_daily_loss
        ));
    }
    if stats.total_trades >= i64::from(config.max_daily_trades) {
        return Some(format!(
            "daily trade count reached {} (limit {})",
            stats.total_trades, config.max_daily_trades
        ));
    }
    None
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::system_state::SystemStateStore;

    fn stats_with(losses: i64, pnl: f64, trades: i64) -> DailyStatsRow {
        let mut stats = DailyStatsRow::empty("2025-06-02");
        stats.consecutive_losses = losses;
        stats.total_pnl = pnl;
        stats.total_trades = trades;
        stats
    }

    #[test]
    fn predicates_fire_at_their_thresholds() {
        let config = RiskControlConfig::default(); // 5 losses, -50k, 15 trades

        assert!(auto_kill_reason(&config, &stats_with(4, -10_000.0, 5)).is_none());
        assert!(auto_kill_reason(&config, &stats_with(5, 0.0, 1))
            .unwrap()
            .contains("consecutive losses"));
        assert!(auto_kill_reason(&config, &stats_with(0, -50_000.0, 1))
            .unwrap()
            .contains("daily loss"));
        assert!(auto_kill_reason(&config, &stats_with(0, 0.0, 15))
            .unwrap()
            .contains("trade count"));
    }

    async fn service(db: &Database) -> RiskControlService {
        RiskControlService::new(
            KillSwitchService::new(SystemStateStore::new(db.pool.clone())),
            BlacklistStore::new(db.pool.clone()),
            ExecutionStore::new(db.pool.clone()),
            PositionStore::new(db.pool.clone()),
            RiskControlConfig::default(),
        )
    }

    #[tokio::test]
    async fn after_fill_trips_kill_switch_once() {
        let db = Database::connect_in_memory().await.unwrap();
        let svc = service(&db).await;
        let kill = KillSwitchService::new(SystemStateStore::new(db.pool.clone()));

        let stats = stats_with(5, -1000.0, 6);
        let out = svc.after_fill("7203", &stats, true).await.unwrap();
        assert!(out.auto_kill_reason.is_some());
        assert!(!kill.is_trading_enabled().await.unwrap());

        let status = kill.status().await.unwrap();
        assert_eq!(status.activated_by.as_deref(), Some("auto_trigger"));

        // Already halted: no re-activation reported.
        let out = svc.after_fill("7203", &stats, true).await.unwrap();
        assert!(out.auto_kill_reason.is_none());
    }

    #[tokio::test]
    async fn clean_fill_has_no_consequences() {
        let db = Database::connect_in_memory().await.unwrap();
        let svc = service(&db).await;

        let out = svc.after_fill("7203", &stats_with(0, 500.0, 1), false).await.unwrap();
        assert!(out.auto_kill_reason.is_none());
        assert!(out.blacklisted_ticker.is_none());
    }

    #[tokio::test]
    async fn metrics_reflect_config_limits() {
        let db = Database::connect_in_memory().await.unwrap();
        let svc = service(&db).await;

        let metrics = svc.metrics(2).await.unwrap();
        assert_eq!(metrics.open_positions, 0);
        assert_eq!(metrics.daily_entries, 2);
        assert_eq!(metrics.max_open_positions, 5);
        assert!((metrics.exposure_utilization_pct).abs() < f64::EPSILON);
    }
}
