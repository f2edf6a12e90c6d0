// =============================================================================
// Execution log — immutable audit of every fill
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, SqliteConnection};

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ExecutionRow {
    pub execution_id: String,
    pub signal_id: String,
    pub order_id: Option<String>,
    pub action: String,
    pub ticker: String,
    pub quantity: i64,
    pub price: f64,
    pub commission: f64,
    pub total_amount: f64,
    pub position_effect: String,
    pub realized_pnl: Option<f64>,
    pub executed_at: DateTime<Utc>,
}

/// Insert one fill row. Always called inside the fill transaction.
pub async fn insert(
    conn: &mut SqliteConnection,
    row: &ExecutionRow,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO execution_log
            (execution_id, signal_id, order_id, action, ticker, quantity, price,
             commission, total_amount, position_effect, realized_pnl, executed_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.execution_id)
    .bind(&row.signal_id)
    .bind(&row.order_id)
    .bind(&row.action)
    .bind(&row.ticker)
    .bind(row.quantity)
    .bind(row.price)
    .bind(row.commission)
    .bind(row.total_amount)
    .bind(&row.position_effect)
    .bind(row.realized_pnl)
    .bind(row.executed_at)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

#[derive(Clone)]
pub struct ExecutionStore {
    pool: SqlitePool,
}

/// Minimal projection for the day-trading guard.
#[derive(Debug, Clone, FromRow)]
pub struct DayFill {
    pub action: String,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fills for one ticker inside a half-open time window, oldest first.
    pub async fn fills_between(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DayFill>, ApiError> {
        let rows = sqlx::query_as::<_, DayFill>(
            r#"
            SELECT action, executed_at FROM execution_log
            WHERE ticker = ? AND executed_at >= ? AND executed_at < ?
            ORDER BY executed_at ASC
            "#,
        )
        .bind(ticker)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64, ApiError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM execution_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Current losing streak on one ticker: consecutive most-recent fills
    /// with negative realized P&L. Fills without P&L (buys) are skipped.
    pub async fn consecutive_losses(&self, ticker: &str) -> Result<u32, ApiError> {
        let pnls: Vec<(f64,)> = sqlx::query_as(
            r#"
            SELECT realized_pnl FROM execution_log
            WHERE ticker = ? AND realized_pnl IS NOT NULL
            ORDER BY executed_at DESC
            LIMIT 20
            "#,
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;

        let mut streak = 0;
        for (pnl,) in pnls {
            if pnl < 0.0 {
                streak += 1;
            } else {
                break;
            }
        }
        Ok(streak)
    }
}

// =============================================================================
// Tests
// =============================================================================
