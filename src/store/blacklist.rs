// =============================================================================
// Blacklist — permanent / temporary / dynamic ticker bans
// =============================================================================
//
// Expired entries are removed on every lookup (lazy sweep); nothing else
// prunes the table.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use tracing::{info, warn};

use crate::error::ApiError;

/// Ban category. `Dynamic` entries are machine-added (e.g. loss streaks) and
/// default to a 30-day expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlacklistType {
    Permanent,
    Temporary,
    Dynamic,
}

impl BlacklistType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Temporary => "temporary",
            Self::Dynamic => "dynamic",
        }
    }
}

/// Default lifetime of a dynamic ban.
const DYNAMIC_EXPIRY_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BlacklistRow {
    pub ticker: String,
    pub reason: String,
    pub blacklist_type: String,
    pub added_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub added_by: String,
    pub metadata: Option<String>,
}

#[derive(Clone)]
pub struct BlacklistStore {
    pool: SqlitePool,
}

impl BlacklistStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether the ticker is currently banned. Sweeps expired entries first.
    pub async fn contains(&self, ticker: &str) -> Result<bool, ApiError> {
        self.sweep_expired().await?;

        let row: Option<(String,)> =
            sqlx::query_as("SELECT reason FROM blacklist WHERE ticker = ?")
                .bind(ticker)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((reason,)) = &row {
            warn!(ticker, reason = %reason, "ticker is blacklisted");
        }
        Ok(row.is_some())
    }

    /// Add a ban unless one already exists. `ttl_days` of `None` means no
    /// expiry (permanent entries).
    pub async fn add(
        &self,
        ticker: &str,
        reason: &str,
        blacklist_type: BlacklistType,
        ttl_days: Option<i64>,
        added_by: &str,
    ) -> Result<bool, ApiError> {
        let now = Utc::now();
        let expires_at = ttl_days.map(|d| now + Duration::days(d));

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO blacklist
                (ticker, reason, blacklist_type, added_at, expires_at, added_by)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ticker)
        .bind(reason)
        .bind(blacklist_type.as_str())
        .bind(now)
        .bind(expires_at)
        .bind(added_by)
        .execute(&self.pool)
        .await?;

        let added = result.rows_affected() > 0;
        if added {
            info!(
                ticker,
                blacklist_type = blacklist_type.as_str(),
                expires_at = ?expires_at,
                "ticker added to blacklist"
            );
        } else {
            warn!(ticker, "ticker already blacklisted");
        }
        Ok(added)
    }

    /// Machine-added ban after a losing streak on the ticker.
    pub async fn add_for_loss_streak(
        &self,
        ticker: &str,
        consecutive_losses: u32,
    ) -> Result<bool, ApiError> {
        let reason = format!("auto-blacklisted after {consecutive_losses} consecutive losses");
        self.add(ticker, &reason, BlacklistType::Dynamic, Some(DYNAMIC_EXPIRY_DAYS), "auto")
            .await
    }

    pub async fn remove(&self, ticker: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM blacklist WHERE ticker = ?")
            .bind(ticker)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn all(&self) -> Result<Vec<BlacklistRow>, ApiError> {
        self.sweep_expired().await?;
        let rows = sqlx::query_as::<_, BlacklistRow>(
            "SELECT ticker, reason, blacklist_type, added_at, expires_at, added_by, metadata \
             FROM blacklist ORDER BY ticker",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn sweep_expired(&self) -> Result<(), ApiError> {
        let result =
            sqlx::query("DELETE FROM blacklist WHERE expires_at IS NOT NULL AND expires_at < ?")
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() > 0 {
            info!(count = result.rows_affected(), "swept expired blacklist entries");
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn add_contains_remove() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = BlacklistStore::new(db.pool.clone());

        assert!(!store.contains("7203").await.unwrap());
        assert!(store.add("7203", "manual ban", BlacklistType::Permanent, None, "admin").await.unwrap());
        assert!(store.contains("7203").await.unwrap());

        // A second add is a no-op, not an error.
        assert!(!store.add("7203", "again", BlacklistType::Temporary, Some(1), "admin").await.unwrap());

        assert!(store.remove("7203").await.unwrap());
        assert!(!store.contains("7203").await.unwrap());
        assert!(!store.remove("7203").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_are_swept_on_lookup() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = BlacklistStore::new(db.pool.clone());

        // Negative TTL backdates the expiry.
        store.add("9984", "short ban", BlacklistType::Temporary, Some(-1), "admin").await.unwrap();
        assert!(!store.contains("9984").await.unwrap());
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dynamic_ban_carries_expiry() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = BlacklistStore::new(db.pool.clone());

        store.add_for_loss_streak("8306", 3).await.unwrap();
        let rows = store.all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].blacklist_type, "dynamic");
        assert_eq!(rows[0].added_by, "auto");
        assert!(rows[0].expires_at.is_some());
        assert!(rows[0].reason.contains("3 consecutive losses"));
    }
}
