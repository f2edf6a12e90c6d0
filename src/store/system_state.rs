// =============================================================================
// System state — typed key/value flags (kill switch and friends)
// =============================================================================

use chrono::Utc;
use sqlx::sqlite::SqlitePool;

use crate::error::ApiError;

#[derive(Clone)]
pub struct SystemStateStore {
    pool: SqlitePool,
}

impl SystemStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, ApiError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM system_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set(&self, key: &str, value: &str, value_type: &str) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO system_state (key, value, value_type, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                value_type = excluded.value_type,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(value_type)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
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
    async fn set_overwrites_and_get_reads_back() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = SystemStateStore::new(db.pool.clone());

        assert!(store.get("trading_enabled").await.unwrap().is_none());

        store.set("trading_enabled", "true", "bool").await.unwrap();
        assert_eq!(store.get("trading_enabled").await.unwrap().as_deref(), Some("true"));

        store.set("trading_enabled", "false", "bool").await.unwrap();
        assert_eq!(store.get("trading_enabled").await.unwrap().as_deref(), Some("false"));
    }
}
