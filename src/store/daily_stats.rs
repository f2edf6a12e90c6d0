// =============================================================================
// Daily statistics — per-calendar-day counters behind the limits and
// auto-kill predicates
// =============================================================================
//
// Row creation is racy between concurrent fills; INSERT OR IGNORE followed by
// a reselect makes the create-if-missing path safe without table locks.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, SqliteConnection};

use crate::error::ApiError;
use crate::types::SignalAction;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DailyStatsRow {
    pub date: String,
    pub entry_count: i64,
    pub exit_count: i64,
    pub total_trades: i64,
    pub error_count: i64,
    pub total_pnl: f64,
    pub total_commission: f64,
    pub consecutive_losses: i64,
    pub consecutive_wins: i64,
}

impl DailyStatsRow {
    pub fn empty(date: &str) -> Self {
        Self {
            date: date.to_string(),
            entry_count: 0,
            exit_count: 0,
            total_trades: 0,
            error_count: 0,
            total_pnl: 0.0,
            total_commission: 0.0,
            consecutive_losses: 0,
            consecutive_wins: 0,
        }
    }
}

const SELECT_COLUMNS: &str = "date, entry_count, exit_count, total_trades, error_count, \
     total_pnl, total_commission, consecutive_losses, consecutive_wins";

#[derive(Clone)]
pub struct DailyStatsStore {
    pool: SqlitePool,
}

impl DailyStatsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The row for `date`, if any trade has created it yet.
    pub async fn for_date(&self, date: NaiveDate) -> Result<Option<DailyStatsRow>, ApiError> {
        let row = sqlx::query_as::<_, DailyStatsRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM daily_stats WHERE date = ?"
        ))
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

/// Apply one fill to the day's counters and return the updated row.
///
/// `pnl`/`is_win` are present only for sell fills (realized against the
/// average cost basis); buys bump the entry count alone.
pub async fn bump_for_fill(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    action: SignalAction,
    pnl: Option<f64>,
    is_win: Option<bool>,
    commission: f64,
    now: DateTime<Utc>,
) -> Result<DailyStatsRow, sqlx::Error> {
    let date_key = date.format("%Y-%m-%d").to_string();

    // Create-if-missing, tolerant of a concurrent creator.
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO daily_stats
            (date, entry_count, exit_count, total_trades, error_count,
             total_pnl, total_commission, consecutive_losses, consecutive_wins, created_at)
        VALUES (?, 0, 0, 0, 0, 0.0, 0.0, 0, 0, ?)
        "#,
    )
    .bind(&date_key)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let (entry_inc, exit_inc) = match action {
        SignalAction::Buy => (1i64, 0i64),
        SignalAction::Sell => (0, 1),
    };

    sqlx::query(
        r#"
        UPDATE daily_stats SET
            entry_count = entry_count + ?,
            exit_count = exit_count + ?,
            total_trades = total_trades + 1,
            total_pnl = total_pnl + ?,
            total_commission = total_commission + ?,
            updated_at = ?
        WHERE date = ?
        "#,
    )
    .bind(entry_inc)
    .bind(exit_inc)
    .bind(pnl.unwrap_or(0.0))
    .bind(commission)
    .bind(now)
    .bind(&date_key)
    .execute(&mut *conn)
    .await?;

    if let Some(win) = is_win {
        if win {
            sqlx::query(
                "UPDATE daily_stats SET consecutive_wins = consecutive_wins + 1, \
                 consecutive_losses = 0 WHERE date = ?",
            )
            .bind(&date_key)
            .execute(&mut *conn)
            .await?;
        } else {
            sqlx::query(
                "UPDATE daily_stats SET consecutive_losses = consecutive_losses + 1, \
                 consecutive_wins = 0 WHERE date = ?",
            )
            .bind(&date_key)
            .execute(&mut *conn)
            .await?;
        }
    }

    sqlx::query_as::<_, DailyStatsRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM daily_stats WHERE date = ?"
    ))
    .bind(&date_key)
    .fetch_one(conn)
    .await
}

// =============================================================================
// Tests
// =============================================================================
