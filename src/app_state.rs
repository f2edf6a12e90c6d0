// =============================================================================
// Central application state — the constructor-injected service graph
// =============================================================================
//
// Every service is a plain struct holding the two shared handles it needs
// (the durable-store pool and the ephemeral TTL store); AppState wires them
// together once at startup and hands an `Arc<AppState>` to the router and
// the background loops. Tests build their own instances the same way.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::config::Settings;
use crate::db::Database;
use crate::ephemeral::TtlStore;
use crate::services::cooldown::CooldownService;
use crate::services::csv_log::CsvAuditLog;
use crate::services::day_trading::DayTradingService;
use crate::services::dedup::DedupService;
use crate::services::kill_switch::KillSwitchService;
use crate::services::market_hours::MarketHoursService;
use crate::services::notify::Notifier;
use crate::services::reconciler::Reconciler;
use crate::services::risk_control::RiskControlService;
use crate::services::validation::PreDispatchValidator;
use crate::store::blacklist::BlacklistStore;
use crate::store::daily_stats::DailyStatsStore;
use crate::store::executions::ExecutionStore;
use crate::store::heartbeats::HeartbeatStore;
use crate::store::positions::PositionStore;
use crate::store::signals::SignalStore;
use crate::store::system_state::SystemStateStore;

pub struct AppState {
    pub settings: Settings,
    pub db: Database,
    pub ephemeral: Arc<TtlStore>,

    // ── Tables ──────────────────────────────────────────────────────────
    pub signals: SignalStore,
    pub positions: PositionStore,
    pub executions: ExecutionStore,
    pub daily_stats: DailyStatsStore,
    pub heartbeats: HeartbeatStore,
    pub blacklist: BlacklistStore,

    // ── Gates & collaborators ───────────────────────────────────────────
    pub dedup: DedupService,
    pub cooldowns: CooldownService,
    pub market_hours: Arc<MarketHoursService>,
    pub kill_switch: KillSwitchService,
    pub day_trading: DayTradingService,
    pub validator: PreDispatchValidator,
    pub reconciler: Reconciler,
    pub risk: RiskControlService,
    pub audit_csv: CsvAuditLog,
    pub notifier: Notifier,

    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, db: Database) -> Result<Self> {
        let pool = db.pool.clone();
        let ephemeral = Arc::new(TtlStore::new());

        let signals = SignalStore::new(pool.clone());
        let positions = PositionStore::new(pool.clone());
        let executions = ExecutionStore::new(pool.clone());
        let daily_stats = DailyStatsStore::new(pool.clone());
        let heartbeats = HeartbeatStore::new(pool.clone());
        let blacklist = BlacklistStore::new(pool.clone());

        let market_hours = Arc::new(MarketHoursService::new(&settings.market_hours)?);
        let kill_switch = KillSwitchService::new(SystemStateStore::new(pool.clone()));
        let day_trading = DayTradingService::new(executions.clone());

        let validator = PreDispatchValidator::new(
            kill_switch.clone(),
            market_hours.clone(),
            blacklist.clone(),
            day_trading.clone(),
            positions.clone(),
            daily_stats.clone(),
            settings.risk_control.clone(),
        );

        let risk = RiskControlService::new(
            kill_switch.clone(),
            blacklist.clone(),
            executions.clone(),
            positions.clone(),
            settings.risk_control.clone(),
        );

        let notifier = Notifier::from_config(&settings.alerts, ephemeral.clone());

        Ok(Self {
            dedup: DedupService::new(ephemeral.clone()),
            cooldowns: CooldownService::new(ephemeral.clone(), settings.cooldown.clone()),
            reconciler: Reconciler::new(pool),
            audit_csv: CsvAuditLog::new(&settings.audit.csv_path),
            ephemeral,
            signals,
            positions,
            executions,
            daily_stats,
            heartbeats,
            blacklist,
            market_hours,
            kill_switch,
            day_trading,
            validator,
            risk,
            notifier,
            settings,
            db,
            start_time: Instant::now(),
        })
    }
}
