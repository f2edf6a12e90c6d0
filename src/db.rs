// =============================================================================
// Durable store — SQLite pool and schema bootstrap
// =============================================================================
//
// SQLite in WAL mode is the single-writer durable store for every table in
// the relay. The pool stays small; all writers live in this one process.
// =============================================================================

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path.
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .context("failed to create database directory")?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to SQLite database")?;

        info!(url = %db_url, "connected to durable store");

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// In-memory database for tests. A single connection keeps every test
    /// statement on the same `:memory:` instance.
    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Create the full schema. Idempotent.
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                signal_id TEXT PRIMARY KEY,
                action TEXT NOT NULL,
                ticker TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price TEXT NOT NULL DEFAULT 'market',
                entry_price REAL NOT NULL,
                stop_loss REAL,
                take_profit REAL,
                atr REAL,
                rr_ratio REAL,
                rsi REAL,
                state TEXT NOT NULL DEFAULT 'pending',
                fetched_by TEXT,
                fetched_at TEXT,
                executed_at TEXT,
                execution_price REAL,
                order_id TEXT,
                checksum TEXT NOT NULL,
                error_message TEXT,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create signals table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_signals_state_expiry
            ON signals (state, expires_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create signals index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                ticker TEXT PRIMARY KEY,
                quantity INTEGER NOT NULL,
                avg_cost REAL NOT NULL,
                sector TEXT,
                entry_signal_id TEXT,
                entry_date TEXT NOT NULL,
                updated_at TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create positions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT UNIQUE NOT NULL,
                signal_id TEXT NOT NULL,
                order_id TEXT,
                action TEXT NOT NULL,
                ticker TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price REAL NOT NULL,
                commission REAL NOT NULL DEFAULT 0,
                total_amount REAL NOT NULL,
                position_effect TEXT NOT NULL,
                realized_pnl REAL,
                executed_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_execution_ticker_time
            ON execution_log (ticker, executed_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create execution_log table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_stats (
                date TEXT PRIMARY KEY,
                entry_count INTEGER NOT NULL DEFAULT 0,
                exit_count INTEGER NOT NULL DEFAULT 0,
                total_trades INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                total_pnl REAL NOT NULL DEFAULT 0,
                total_commission REAL NOT NULL DEFAULT 0,
                consecutive_losses INTEGER NOT NULL DEFAULT 0,
                consecutive_wins INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create daily_stats table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blacklist (
                ticker TEXT PRIMARY KEY,
                reason TEXT NOT NULL,
                blacklist_type TEXT NOT NULL,
                added_at TEXT NOT NULL,
                expires_at TEXT,
                added_by TEXT NOT NULL DEFAULT 'auto',
                metadata TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create blacklist table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS system_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                value_type TEXT NOT NULL DEFAULT 'string',
                updated_at TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create system_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS heartbeat (
                client_id TEXT PRIMARY KEY,
                last_heartbeat TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create heartbeat table")?;

        info!("durable store schema initialized");
        Ok(())
    }

    /// Liveness probe for /health.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
