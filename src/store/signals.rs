// =============================================================================
// Signal table — the pending queue and its state machine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::types::SignalState;

/// One row of the `signals` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SignalRecord {
    pub signal_id: String,
    pub action: String,
    pub ticker: String,
    pub quantity: i64,
    pub price: String,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub atr: Option<f64>,
    pub rr_ratio: Option<f64>,
    pub rsi: Option<f64>,
    pub state: String,
    pub fetched_by: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_price: Option<f64>,
    pub order_id: Option<String>,
    pub checksum: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignalRecord {
    pub fn signal_state(&self) -> SignalState {
        // Rows are only ever written through this module, so the column is
        // always one of the five states.
        SignalState::parse(&self.state).unwrap_or(SignalState::Failed)
    }
}

/// Result of attempting to persist a fresh signal.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The primary key already existed — a concurrent ingress of the same
    /// intent won the race.
    Duplicate,
}

#[derive(Clone)]
pub struct SignalStore {
    pool: SqlitePool,
}

impl SignalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new PENDING signal. A unique-key violation is reported as
    /// [`InsertOutcome::Duplicate`] rather than an error so the ingress path
    /// can replay the winner's reply.
    pub async fn insert_pending(&self, record: &SignalRecord) -> Result<InsertOutcome, ApiError> {
        let result = sqlx::query(
            r#"
            INSERT INTO signals
                (signal_id, action, ticker, quantity, price, entry_price,
                 stop_loss, take_profit, atr, rr_ratio, rsi,
                 state, checksum, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.signal_id)
        .bind(&record.action)
        .bind(&record.ticker)
        .bind(record.quantity)
        .bind(&record.price)
        .bind(record.entry_price)
        .bind(record.stop_loss)
        .bind(record.take_profit)
        .bind(record.atr)
        .bind(record.rr_ratio)
        .bind(record.rsi)
        .bind(SignalState::Pending.as_str())
        .bind(&record.checksum)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db_err))
                if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation =>
            {
                warn!(signal_id = %record.signal_id, "duplicate signal insert lost the race");
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find(&self, signal_id: &str) -> Result<Option<SignalRecord>, ApiError> {
        let row = sqlx::query_as::<_, SignalRecord>("SELECT * FROM signals WHERE signal_id = ?")
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// All PENDING, unexpired signals in insertion order.
    pub async fn pending(&self, now: DateTime<Utc>) -> Result<Vec<SignalRecord>, ApiError> {
        let rows = sqlx::query_as::<_, SignalRecord>(
            r#"
            SELECT * FROM signals
            WHERE state = 'pending' AND expires_at > ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// PENDING -> FETCHED. Returns false if the row was no longer pending
    /// (the caller has already handled the idempotent re-ack case).
    pub async fn mark_fetched(
        &self,
        signal_id: &str,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE signals SET state = 'fetched', fetched_by = ?, fetched_at = ?
            WHERE signal_id = ? AND state = 'pending'
            "#,
        )
        .bind(client_id)
        .bind(now)
        .bind(signal_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// PENDING/FETCHED -> FAILED with the reason recorded.
    pub async fn mark_failed(&self, signal_id: &str, error: &str) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE signals SET state = 'failed', error_message = ?
            WHERE signal_id = ? AND state IN ('pending', 'fetched')
            "#,
        )
        .bind(error)
        .bind(signal_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sweep: every PENDING signal past its deadline becomes EXPIRED.
    /// Returns how many rows were transitioned.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, ApiError> {
        let result = sqlx::query(
            "UPDATE signals SET state = 'expired' WHERE state = 'pending' AND expires_at <= ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        let swept = result.rows_affected();
        if swept > 0 {
            info!(count = swept, "expired overdue pending signals");
        }
        Ok(swept)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Duration;

    fn sample(signal_id: &str, ticker: &str, action: &str) -> SignalRecord {
        let now = Utc::now();
        SignalRecord {
            signal_id: signal_id.to_string(),
            action: action.to_string(),
            ticker: ticker.to_string(),
            quantity: 100,
            price: "market".to_string(),
            entry_price: 1850.0,
            stop_loss: Some(1800.0),
            take_profit: Some(1950.0),
            atr: None,
            rr_ratio: None,
            rsi: None,
            state: "pending".to_string(),
            fetched_by: None,
            fetched_at: None,
            executed_at: None,
            execution_price: None,
            order_id: None,
            checksum: "0123456789abcdef".to_string(),
            error_message: None,
            created_at: now,
            expires_at: now + Duration::minutes(15),
        }
    }

    #[tokio::test]
    async fn insert_find_and_duplicate() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = SignalStore::new(db.pool.clone());

        let rec = sample("sig_20250101_100000_7203_buy", "7203", "buy");
        assert_eq!(store.insert_pending(&rec).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert_pending(&rec).await.unwrap(), InsertOutcome::Duplicate);

        let found = store.find(&rec.signal_id).await.unwrap().unwrap();
        assert_eq!(found.ticker, "7203");
        assert_eq!(found.signal_state(), SignalState::Pending);
        assert_eq!(found.checksum, rec.checksum);

        assert!(store.find("sig_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_ordering_and_expiry_filter() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = SignalStore::new(db.pool.clone());
        let now = Utc::now();

        let mut a = sample("sig_a", "7203", "buy");
        a.created_at = now - Duration::seconds(30);
        let mut b = sample("sig_b", "9984", "buy");
        b.created_at = now - Duration::seconds(10);
        let mut stale = sample("sig_stale", "8306", "buy");
        stale.expires_at = now - Duration::seconds(1);

        store.insert_pending(&b).await.unwrap();
        store.insert_pending(&a).await.unwrap();
        store.insert_pending(&stale).await.unwrap();

        let pending = store.pending(now).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|s| s.signal_id.as_str()).collect();
        assert_eq!(ids, vec!["sig_a", "sig_b"]);
    }

    #[tokio::test]
    async fn fetched_transition_is_single_shot() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = SignalStore::new(db.pool.clone());
        let rec = sample("sig_x", "7203", "buy");
        store.insert_pending(&rec).await.unwrap();

        let now = Utc::now();
        assert!(store.mark_fetched("sig_x", "excel-01", now).await.unwrap());
        // Second transition finds no pending row.
        assert!(!store.mark_fetched("sig_x", "excel-02", now).await.unwrap());

        let row = store.find("sig_x").await.unwrap().unwrap();
        assert_eq!(row.signal_state(), SignalState::Fetched);
        assert_eq!(row.fetched_by.as_deref(), Some("excel-01"));
        assert!(row.fetched_at.is_some());
    }

    #[tokio::test]
    async fn expiry_sweep_only_touches_pending() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = SignalStore::new(db.pool.clone());
        let now = Utc::now();

        let mut overdue = sample("sig_overdue", "7203", "buy");
        overdue.expires_at = now - Duration::seconds(5);
        let mut fetched = sample("sig_fetched", "9984", "buy");
        fetched.expires_at = now - Duration::seconds(5);

        store.insert_pending(&overdue).await.unwrap();
        store.insert_pending(&fetched).await.unwrap();
        store.mark_fetched("sig_fetched", "excel-01", now).await.unwrap();

        assert_eq!(store.expire_overdue(now).await.unwrap(), 1);
        let row = store.find("sig_overdue").await.unwrap().unwrap();
        assert_eq!(row.signal_state(), SignalState::Expired);
        let row = store.find("sig_fetched").await.unwrap().unwrap();
        assert_eq!(row.signal_state(), SignalState::Fetched);

        // Expired rows never come back from the pending query.
        assert!(store.pending(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_records_reason() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = SignalStore::new(db.pool.clone());
        store.insert_pending(&sample("sig_f", "7203", "buy")).await.unwrap();

        store.mark_failed("sig_f", "kill_switch_active").await.unwrap();
        let row = store.find("sig_f").await.unwrap().unwrap();
        assert_eq!(row.signal_state(), SignalState::Failed);
        assert_eq!(row.error_message.as_deref(), Some("kill_switch_active"));

        // Terminal states are not overwritten.
        store.mark_failed("sig_f", "other").await.unwrap();
        let row = store.find("sig_f").await.unwrap().unwrap();
        assert_eq!(row.error_message.as_deref(), Some("kill_switch_active"));
    }
}
