// =============================================================================
// Heartbeat table — executor client liveness
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct HeartbeatRow {
    pub client_id: String,
    pub last_heartbeat: DateTime<Utc>,
    pub status: String,
}

#[derive(Clone)]
pub struct HeartbeatStore {
    pool: SqlitePool,
}

impl HeartbeatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a ping from a client; revives an inactive row.
    pub async fn record(&self, client_id: &str, at: DateTime<Utc>) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO heartbeat (client_id, last_heartbeat, status, created_at)
            VALUES (?, ?, 'active', ?)
            ON CONFLICT(client_id) DO UPDATE SET
                last_heartbeat = excluded.last_heartbeat,
                status = 'active',
                updated_at = excluded.created_at
            "#,
        )
        .bind(client_id)
        .bind(at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<HeartbeatRow>, ApiError> {
        let rows = sqlx::query_as::<_, HeartbeatRow>(
            "SELECT client_id, last_heartbeat, status FROM heartbeat ORDER BY client_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Flag clients whose last ping predates `cutoff` and are still marked
    /// active. Returns the flagged rows so the monitor can alert on them.
    pub async fn mark_stale(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<HeartbeatRow>, ApiError> {
        let stale = sqlx::query_as::<_, HeartbeatRow>(
            "SELECT client_id, last_heartbeat, status FROM heartbeat \
             WHERE status = 'active' AND last_heartbeat < ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        if !stale.is_empty() {
            sqlx::query(
                "UPDATE heartbeat SET status = 'inactive', updated_at = ? \
                 WHERE status = 'active' AND last_heartbeat < ?",
            )
            .bind(Utc::now())
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        }

        Ok(stale)
    }
}

// =============================================================================
// Tests
// =============================================================================
