// =============================================================================
// signal-relay — Main Entry Point
// =============================================================================
//
// Webhook-to-executor trading-signal relay: accepts charting-platform
// alerts, runs them through the safety gauntlet, queues survivors, and
// reconciles the executor's fill reports against account state.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod config;
mod db;
mod ephemeral;
mod error;
mod services;
mod store;
mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::Settings;
use crate::db::Database;
use crate::types::AlertLevel;

/// Cadence of the PENDING -> EXPIRED sweep.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
/// Cadence of the heartbeat staleness monitor.
const HEARTBEAT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone()));

    if settings.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    // A broken configuration must exit non-zero before anything binds.
    let settings = Settings::load(&config_path)
        .with_context(|| format!("startup aborted: bad configuration ({config_path})"))?;

    init_tracing(&settings);

    info!("============================================================");
    info!("signal-relay starting");
    info!("============================================================");

    // ── 2. Durable store & shared state ──────────────────────────────────
    let db = Database::connect(&settings.database.url).await?;
    let bind_addr = format!("{}:{}", settings.server.host, settings.server.port);
    let state = Arc::new(AppState::new(settings, db)?);

    // ── 3. Expiry sweep loop ─────────────────────────────────────────────
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = sweep_state.signals.expire_overdue(Utc::now()).await {
                error!(error = ?e, "expiry sweep failed");
            }
        }
    });

    // ── 4. Heartbeat monitor loop ────────────────────────────────────────
    let hb_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_MONITOR_INTERVAL);
        loop {
            interval.tick().await;

            let timeout = hb_state.settings.heartbeat.timeout_seconds as i64;
            let cutoff = Utc::now() - ChronoDuration::seconds(timeout);
            match hb_state.heartbeats.mark_stale(cutoff).await {
                Ok(stale) => {
                    for client in stale {
                        warn!(
                            client_id = %client.client_id,
                            last_heartbeat = %client.last_heartbeat,
                            "executor heartbeat lost"
                        );
                        hb_state.notifier.dispatch(
                            AlertLevel::Warning,
                            "executor heartbeat lost",
                            vec![
                                ("client".to_string(), client.client_id.clone()),
                                (
                                    "last heartbeat".to_string(),
                                    client.last_heartbeat.to_rfc3339(),
                                ),
                            ],
                        );
                    }
                }
                Err(e) => error!(error = ?e, "heartbeat monitor failed"),
            }
        }
    });

    // ── 5. Serve ─────────────────────────────────────────────────────────
    let app = api::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "relay listening");

    state.notifier.dispatch(
        AlertLevel::Info,
        "relay started",
        vec![("bind".to_string(), bind_addr.clone())],
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        warn!("shutdown signal received — stopping gracefully");
    })
    .await?;

    info!("signal-relay shut down complete");
    Ok(())
}
