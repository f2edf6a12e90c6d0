// =============================================================================
// Position table — current holdings per ticker
// =============================================================================
//
// A row exists only while quantity > 0: created on the first buy fill,
// weighted-average merged on later buys, decremented on sells, deleted when
// the quantity reaches zero.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, SqliteConnection};

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PositionRow {
    pub ticker: String,
    pub quantity: i64,
    pub avg_cost: f64,
    pub sector: Option<String>,
    pub entry_signal_id: Option<String>,
    pub entry_date: DateTime<Utc>,
}

/// What a sell fill did to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellEffect {
    Reduced,
    Closed,
}

#[derive(Clone)]
pub struct PositionStore {
    pool: SqlitePool,
}

impl PositionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, ticker: &str) -> Result<Option<PositionRow>, ApiError> {
        let row = sqlx::query_as::<_, PositionRow>(
            "SELECT ticker, quantity, avg_cost, sector, entry_signal_id, entry_date \
             FROM positions WHERE ticker = ?",
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn all(&self) -> Result<Vec<PositionRow>, ApiError> {
        let rows = sqlx::query_as::<_, PositionRow>(
            "SELECT ticker, quantity, avg_cost, sector, entry_signal_id, entry_date \
             FROM positions ORDER BY ticker",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn open_count(&self) -> Result<i64, ApiError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM positions WHERE quantity > 0")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Sum of quantity * avg_cost over all holdings.
    pub async fn total_exposure(&self) -> Result<f64, ApiError> {
        let (exposure,): (f64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(quantity * avg_cost), 0.0) FROM positions WHERE quantity > 0",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(exposure)
    }
}

// -----------------------------------------------------------------------------
// Transactional mutations (used by the reconciler inside a fill transaction)
// -----------------------------------------------------------------------------

pub async fn find_in_tx(
    conn: &mut SqliteConnection,
    ticker: &str,
) -> Result<Option<PositionRow>, sqlx::Error> {
    sqlx::query_as::<_, PositionRow>(
        "SELECT ticker, quantity, avg_cost, sector, entry_signal_id, entry_date \
         FROM positions WHERE ticker = ?",
    )
    .bind(ticker)
    .fetch_optional(conn)
    .await
}

/// Merge a buy fill into the position: weighted-average cost on an existing
/// row, or a fresh row with the entry signal recorded.
pub async fn apply_buy(
    conn: &mut SqliteConnection,
    ticker: &str,
    quantity: i64,
    price: f64,
    entry_signal_id: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    match find_in_tx(conn, ticker).await? {
        Some(existing) => {
            let total_cost = existing.quantity as f64 * existing.avg_cost
                + quantity as f64 * price;
            let total_quantity = existing.quantity + quantity;
            let avg_cost = total_cost / total_quantity as f64;

            sqlx::query(
                "UPDATE positions SET quantity = ?, avg_cost = ?, updated_at = ? WHERE ticker = ?",
            )
            .bind(total_quantity)
            .bind(avg_cost)
            .bind(now)
            .bind(ticker)
            .execute(conn)
            .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO positions (ticker, quantity, avg_cost, entry_signal_id, entry_date) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(ticker)
            .bind(quantity)
            .bind(price)
            .bind(entry_signal_id)
            .bind(now)
            .execute(conn)
            .await?;
        }
    }
    Ok(())
}

/// Apply a sell fill. Selling the full quantity (or more) deletes the row;
/// a partial sell decrements it. Returns the effect and the cost basis at
/// sell time, or `None` when no position existed (the gates should have made
/// that impossible, the caller decides how loudly to complain).
pub async fn apply_sell(
    conn: &mut SqliteConnection,
    ticker: &str,
    quantity: i64,
    now: DateTime<Utc>,
) -> Result<Option<(SellEffect, f64)>, sqlx::Error> {
    let Some(existing) = find_in_tx(conn, ticker).await? else {
        return Ok(None);
    };

    let effect = if existing.quantity <= quantity {
        sqlx::query("DELETE FROM positions WHERE ticker = ?")
            .bind(ticker)
            .execute(conn)
            .await?;
        SellEffect::Closed
    } else {
        sqlx::query("UPDATE positions SET quantity = quantity - ?, updated_at = ? WHERE ticker = ?")
            .bind(quantity)
            .bind(now)
            .bind(ticker)
            .execute(conn)
            .await?;
        SellEffect::Reduced
    };

    Ok(Some((effect, existing.avg_cost)))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn buy_creates_then_averages() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = PositionStore::new(db.pool.clone());
        let now = Utc::now();

        let mut conn = db.pool.acquire().await.unwrap();
        apply_buy(&mut conn, "7203", 100, 1850.0, "sig_1", now).await.unwrap();
        apply_buy(&mut conn, "7203", 100, 1950.0, "sig_2", now).await.unwrap();
        drop(conn);

        let pos = store.find("7203").await.unwrap().unwrap();
        assert_eq!(pos.quantity, 200);
        assert!((pos.avg_cost - 1900.0).abs() < 1e-9);
        // First buy owns the entry metadata.
        assert_eq!(pos.entry_signal_id.as_deref(), Some("sig_1"));
    }

    #[tokio::test]
    async fn sell_decrements_then_deletes_at_zero() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = PositionStore::new(db.pool.clone());
        let now = Utc::now();

        let mut conn = db.pool.acquire().await.unwrap();
        apply_buy(&mut conn, "7203", 300, 1800.0, "sig_1", now).await.unwrap();

        let (effect, basis) = apply_sell(&mut conn, "7203", 100, now).await.unwrap().unwrap();
        assert_eq!(effect, SellEffect::Reduced);
        assert!((basis - 1800.0).abs() < 1e-9);

        // Exact remaining quantity closes the position — no zero-quantity row.
        let (effect, _) = apply_sell(&mut conn, "7203", 200, now).await.unwrap().unwrap();
        assert_eq!(effect, SellEffect::Closed);
        drop(conn);

        assert!(store.find("7203").await.unwrap().is_none());
        assert_eq!(store.open_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sell_without_position_reports_none() {
        let db = Database::connect_in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();
        let out = apply_sell(&mut conn, "9984", 100, Utc::now()).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn exposure_sums_holdings() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = PositionStore::new(db.pool.clone());
        let now = Utc::now();

        assert_eq!(store.total_exposure().await.unwrap(), 0.0);

        let mut conn = db.pool.acquire().await.unwrap();
        apply_buy(&mut conn, "7203", 100, 1800.0, "sig_1", now).await.unwrap();
        apply_buy(&mut conn, "9984", 200, 9000.0, "sig_2", now).await.unwrap();
        drop(conn);

        let exposure = store.total_exposure().await.unwrap();
        assert!((exposure - (100.0 * 1800.0 + 200.0 * 9000.0)).abs() < 1e-6);
        assert_eq!(store.open_count().await.unwrap(), 2);
    }
}
