// =============================================================================
// Pre-dispatch validator — the safety gauntlet run at poll time
// =============================================================================
//
// Runs once per pending signal at the moment a poll would hand it out, not at
// ingress: the kill switch may have tripped, the position may be gone, daily
// limits may be spent. Levels short-circuit on the first failure:
//
//   1. kill switch          4. day-trading guard
//   2. market hours         5. daily limits
//   3. parameter sanity     6. risk limits (buys only)
//
// A failing signal is transitioned PENDING -> FAILED by the caller with the
// reason produced here.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::RiskControlConfig;
use crate::error::ApiError;
use crate::services::day_trading::DayTradingService;
use crate::services::kill_switch::KillSwitchService;
use crate::services::market_hours::MarketHoursService;
use crate::store::blacklist::BlacklistStore;
use crate::store::daily_stats::{DailyStatsRow, DailyStatsStore};
use crate::store::positions::{PositionRow, PositionStore};
use crate::store::signals::SignalRecord;
use crate::types::SignalAction;

/// Per-level outcome, reported alongside the verdict for the logs.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub name: &'static str,
    pub status: &'static str,
}

#[derive(Debug)]
pub enum ValidationOutcome {
    Pass { checks: Vec<CheckReport> },
    Rejected { reason: String, checks: Vec<CheckReport> },
}

pub struct PreDispatchValidator {
    kill_switch: KillSwitchService,
    market_hours: Arc<MarketHoursService>,
    blacklist: BlacklistStore,
    day_trading: DayTradingService,
    positions: PositionStore,
    daily_stats: DailyStatsStore,
    risk: RiskControlConfig,
}

impl PreDispatchValidator {
    pub fn new(
        kill_switch: KillSwitchService,
        market_hours: Arc<MarketHoursService>,
        blacklist: BlacklistStore,
        day_trading: DayTradingService,
        positions: PositionStore,
        daily_stats: DailyStatsStore,
        risk: RiskControlConfig,
    ) -> Self {
        Self { kill_switch, market_hours, blacklist, day_trading, positions, daily_stats, risk }
    }

    pub async fn validate(
        &self,
        signal: &SignalRecord,
        now: DateTime<Utc>,
    ) -> Result<ValidationOutcome, ApiError> {
        let mut checks = Vec::with_capacity(6);
        let reject = |reason: String, mut checks: Vec<CheckReport>, name| {
            checks.push(CheckReport { name, status: "BLOCKED" });
            warn!(signal_id = %signal.signal_id, reason = %reason, "pre-dispatch validation failed");
            ValidationOutcome::Rejected { reason, checks }
        };

        // 1. Kill switch.
        if !self.kill_switch.is_trading_enabled().await? {
            return Ok(reject("kill_switch_active".into(), checks, "kill_switch"));
        }
        checks.push(CheckReport { name: "kill_switch", status: "OK" });

        // 2. Market hours.
        let local = now.with_timezone(&self.market_hours.timezone());
        if !self.market_hours.is_safe_window_at(local) {
            return Ok(reject("outside_trading_hours".into(), checks, "market_hours"));
        }
        checks.push(CheckReport { name: "market_hours", status: "OK" });

        // 3. Parameter sanity (incl. blacklist and the sell-position check).
        let blacklisted = self.blacklist.contains(&signal.ticker).await?;
        let position = self.positions.find(&signal.ticker).await?;
        let action = match parameter_check(signal, blacklisted, position.as_ref()) {
            Ok(action) => action,
            Err(errors) => {
                let reason = format!("parameter_validation_failed: {}", errors.join(", "));
                return Ok(reject(reason, checks, "parameters"));
            }
        };
        checks.push(CheckReport { name: "parameters", status: "OK" });

        // 4. Day-trading guard.
        if let Err(detail) = self
            .day_trading
            .check(&signal.ticker, action, &self.market_hours, now)
            .await?
        {
            let reason = format!("day_trading_violation: {detail}");
            return Ok(reject(reason, checks, "day_trading"));
        }
        checks.push(CheckReport { name: "day_trading", status: "OK" });

        // 5. Daily limits.
        let stats = self.daily_stats.for_date(self.market_hours.local_date(now)).await?;
        if let Err(reason) = daily_limit_errors(&self.risk, action, stats.as_ref()) {
            return Ok(reject(reason, checks, "daily_limits"));
        }
        checks.push(CheckReport { name: "daily_limits", status: "OK" });

        // 6. Risk limits — buys only.
        if action == SignalAction::Buy {
            let open_count = self.positions.open_count().await?;
            let exposure = self.positions.total_exposure().await?;
            if let Err(reason) = risk_limit_errors(
                &self.risk,
                signal.quantity,
                open_count,
                position.as_ref().map(|p| (p.quantity, p.avg_cost)),
                exposure,
                stats.as_ref().map(|s| s.total_pnl),
            ) {
                return Ok(reject(reason, checks, "risk_limits"));
            }
        }
        checks.push(CheckReport { name: "risk_limits", status: "OK" });

        Ok(ValidationOutcome::Pass { checks })
    }
}

// -----------------------------------------------------------------------------
// Pure check functions
// -----------------------------------------------------------------------------

pub fn ticker_is_valid(ticker: &str) -> bool {
    ticker.len() == 4 && ticker.bytes().all(|b| b.is_ascii_digit())
}

/// Level-3 parameter sanity. Collects every violation rather than stopping
/// at the first so the reason string names them all; a clean pass yields the
/// parsed action for the remaining levels.
fn parameter_check(
    signal: &SignalRecord,
    blacklisted: bool,
    position: Option<&PositionRow>,
) -> Result<SignalAction, Vec<String>> {
    let mut errors = Vec::new();

    if !ticker_is_valid(&signal.ticker) {
        errors.push(format!("invalid ticker format: {}", signal.ticker));
    }
    if blacklisted {
        errors.push(format!("ticker {} is blacklisted", signal.ticker));
    }

    let Some(action) = SignalAction::parse(&signal.action) else {
        errors.push(format!("invalid action: {}", signal.action));
        return Err(errors);
    };

    if signal.quantity <= 0 {
        errors.push("quantity must be positive".into());
        return Err(errors);
    }
    if signal.quantity % 100 != 0 {
        errors.push(format!("quantity must be a multiple of 100 (got {})", signal.quantity));
    }
    if signal.quantity < 100 {
        errors.push(format!("quantity too small: {} (minimum 100)", signal.quantity));
    }
    if signal.quantity > 10_000 {
        errors.push(format!("quantity too large: {} (maximum 10000)", signal.quantity));
    }

    if signal.price != "market" {
        errors.push(format!("only market orders allowed (got {})", signal.price));
    }

    if action == SignalAction::Sell {
        match position {
            None => errors.push(format!("cannot sell {}: no position exists", signal.ticker)),
            Some(p) if p.quantity < signal.quantity => errors.push(format!(
                "insufficient quantity to sell: {} > {}",
                signal.quantity, p.quantity
            )),
            Some(_) => {}
        }
    }

    if errors.is_empty() {
        Ok(action)
    } else {
        Err(errors)
    }
}

/// Level 5. No stats row yet means nothing has traded today.
fn daily_limit_errors(
    risk: &RiskControlConfig,
    action: SignalAction,
    stats: Option<&DailyStatsRow>,
) -> Result<(), String> {
    let Some(stats) = stats else { return Ok(()) };

    if action == SignalAction::Buy && stats.entry_count >= i64::from(risk.max_daily_entries) {
        return Err(format!(
            "daily_entry_limit_exceeded: {}/{}",
            stats.entry_count, risk.max_daily_entries
        ));
    }
    if stats.total_trades >= i64::from(risk.max_daily_trades) {
        return Err(format!(
            "daily_trade_limit_exceeded: {}/{}",
            stats.total_trades, risk.max_daily_trades
        ));
    }
    Ok(())
}

/// Level 6 (buys only). Exposure is projected with the configured price
/// proxy since no fill price exists yet.
fn risk_limit_errors(
    risk: &RiskControlConfig,
    quantity: i64,
    open_count: i64,
    existing: Option<(i64, f64)>,
    current_exposure: f64,
    today_pnl: Option<f64>,
) -> Result<(), String> {
    if existing.is_none() && open_count >= i64::from(risk.max_open_positions) {
        return Err(format!(
            "max_open_positions_exceeded: {}/{}",
            open_count, risk.max_open_positions
        ));
    }

    let order_value = quantity as f64 * risk.estimated_price_per_share;
    let total_exposure = current_exposure + order_value;
    if total_exposure > risk.max_total_exposure {
        return Err(format!(
            "max_total_exposure_exceeded: {total_exposure}/{}",
            risk.max_total_exposure
        ));
    }

    let ticker_value = match existing {
        Some((qty, avg_cost)) => (qty + quantity) as f64 * avg_cost,
        None => order_value,
    };
    if ticker_value > risk.max_position_per_ticker {
        return Err(format!(
            "max_position_per_ticker_exceeded: {ticker_value}/{}",
            risk.max_position_per_ticker
        ));
    }

    if let Some(pnl) = today_pnl {
        if pnl <= risk.max_daily_loss {
            return Err(format!("max_daily_loss_exceeded: {pnl}/{}", risk.max_daily_loss));
        }
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
