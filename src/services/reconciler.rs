// =============================================================================
// Reconciler — applies an execution report to account state, atomically
// =============================================================================
//
// One fill mutates four tables together or not at all:
//   signals        PENDING/FETCHED -> EXECUTED
//   execution_log  one immutable row
//   positions      weighted-average merge / decrement / delete
//   daily_stats    counters, P&L, win/loss streaks
//
// Sell fills realize P&L against the position's average cost at sell time;
// buys carry none.
// =============================================================================

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use tracing::info;

use crate::error::ApiError;
use crate::services::market_hours::MarketHoursService;
use crate::store::daily_stats::{bump_for_fill, DailyStatsRow};
use crate::store::executions::{self, ExecutionRow};
use crate::store::positions;
use crate::store::signals::SignalRecord;
use crate::types::SignalAction;

/// Execution report from the client, already shape-checked by the handler.
#[derive(Debug, Clone)]
pub struct FillReport {
    pub client_id: String,
    pub execution_price: f64,
    pub execution_quantity: i64,
    pub order_id: String,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FillOutcome {
    pub execution_id: String,
    pub realized_pnl: Option<f64>,
    pub is_win: Option<bool>,
    pub stats: DailyStatsRow,
}

#[derive(Clone)]
pub struct Reconciler {
    pool: SqlitePool,
}

impl Reconciler {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn apply_fill(
        &self,
        signal: &SignalRecord,
        report: &FillReport,
        market_hours: &MarketHoursService,
        now: DateTime<Utc>,
    ) -> Result<FillOutcome, ApiError> {
        let action = SignalAction::parse(&signal.action).ok_or_else(|| {
            ApiError::Internal(anyhow::anyhow!(
                "signal {} has unparsable action {:?}",
                signal.signal_id,
                signal.action
            ))
        })?;

        let mut tx = self.pool.begin().await?;

        // Signal transition. A terminal row means a concurrent report won.
        let updated = sqlx::query(
            r#"
            UPDATE signals SET state = 'executed', executed_at = ?, execution_price = ?, order_id = ?
            WHERE signal_id = ? AND state IN ('pending', 'fetched')
            "#,
        )
        .bind(report.executed_at)
        .bind(report.execution_price)
        .bind(&report.order_id)
        .bind(&signal.signal_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(ApiError::Conflict(format!(
                "signal {} already executed",
                signal.signal_id
            )));
        }

        // Position mutation; sells also yield the cost basis for P&L.
        let (realized_pnl, is_win) = match action {
            SignalAction::Buy => {
                positions::apply_buy(
                    &mut tx,
                    &signal.ticker,
                    report.execution_quantity,
                    report.execution_price,
                    &signal.signal_id,
                    now,
                )
                .await?;
                (None, None)
            }
            SignalAction::Sell => {
                let applied = positions::apply_sell(
                    &mut tx,
                    &signal.ticker,
                    report.execution_quantity,
                    now,
                )
                .await?;
                match applied {
                    Some((_, avg_cost)) => {
                        let pnl = (report.execution_price - avg_cost)
                            * report.execution_quantity as f64;
                        (Some(pnl), Some(pnl > 0.0))
                    }
                    // The gates make this unreachable in the normal flow; a
                    // manual DB edit could still get here. Record no P&L.
                    None => (None, None),
                }
            }
        };

        let local = report.executed_at.with_timezone(&market_hours.timezone());
        let execution_id =
            format!("EXE_{}_{}", local.format("%Y%m%d_%H%M%S"), signal.ticker);

        // TODO: derive position_effect from the position delta instead of the
        // action; an add-on buy is not an "open" and a partial sell is not a
        // full "close".
        let position_effect = match action {
            SignalAction::Buy => "open",
            SignalAction::Sell => "close",
        };

        executions::insert(
            &mut tx,
            &ExecutionRow {
                execution_id: execution_id.clone(),
                signal_id: signal.signal_id.clone(),
                order_id: Some(report.order_id.clone()),
                action: signal.action.clone(),
                ticker: signal.ticker.clone(),
                quantity: report.execution_quantity,
                price: report.execution_price,
                commission: 0.0,
                total_amount: report.execution_price * report.execution_quantity as f64,
                position_effect: position_effect.to_string(),
                realized_pnl,
                executed_at: report.executed_at,
            },
            now,
        )
        .await?;

        let stats = bump_for_fill(
            &mut tx,
            market_hours.local_date(now),
            action,
            realized_pnl,
            is_win,
            0.0,
            now,
        )
        .await?;

        tx.commit().await?;

        info!(
            signal_id = %signal.signal_id,
            execution_id = %execution_id,
            ticker = %signal.ticker,
            action = %signal.action,
            price = report.execution_price,
            quantity = report.execution_quantity,
            realized_pnl = ?realized_pnl,
            "fill reconciled"
        );

        Ok(FillOutcome { execution_id, realized_pnl, is_win, stats })
    }
}

// =============================================================================
// Tests
// =============================================================================
