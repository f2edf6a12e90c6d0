// =============================================================================
// Settings — YAML configuration with environment overrides
// =============================================================================
//
// Loaded once at startup from a YAML file (default `config.yaml`, overridable
// via RELAY_CONFIG). Secrets can be supplied or overridden through the
// environment so the YAML file never has to contain them.
//
// Every field carries `#[serde(default)]` so an older or partial config file
// still loads.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_database_url() -> String {
    "sqlite://data/relay.db".to_string()
}

fn default_expiration_minutes() -> i64 {
    15
}

fn default_buy_same_ticker() -> u64 {
    1800
}

fn default_buy_any_ticker() -> u64 {
    300
}

fn default_sell_same_ticker() -> u64 {
    900
}

fn default_max_total_exposure() -> f64 {
    1_000_000.0
}

fn default_max_position_per_ticker() -> f64 {
    200_000.0
}

fn default_max_open_positions() -> u32 {
    5
}

fn default_max_daily_entries() -> u32 {
    5
}

fn default_max_daily_trades() -> u32 {
    15
}

fn default_max_consecutive_losses() -> u32 {
    5
}

fn default_max_daily_loss() -> f64 {
    -50_000.0
}

fn default_estimated_price_per_share() -> f64 {
    1000.0
}

fn default_dynamic_blacklist_losses() -> u32 {
    3
}

fn default_timezone() -> String {
    "Asia/Tokyo".to_string()
}

fn default_morning_window() -> TradingWindow {
    TradingWindow { start: "09:30".into(), end: "11:20".into() }
}

fn default_afternoon_window() -> TradingWindow {
    TradingWindow { start: "13:00".into(), end: "14:30".into() }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

fn default_frequency_limits() -> HashMap<String, u64> {
    HashMap::from([
        ("INFO".to_string(), 60),
        ("WARNING".to_string(), 30),
        ("ERROR".to_string(), 15),
    ])
}

fn default_heartbeat_timeout() -> u64 {
    300
}

fn default_csv_path() -> String {
    "data/logs/signals.csv".to_string()
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// Secrets gating the three authenticated surfaces. All three must be
/// non-empty at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Shared secret expected in every webhook body.
    #[serde(default)]
    pub webhook_secret: String,
    /// Bearer token for the executor-facing /api/signals surface.
    #[serde(default)]
    pub api_key: String,
    /// Password required to toggle the kill switch.
    #[serde(default)]
    pub admin_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: default_database_url() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Minutes a PENDING signal stays dispatchable before the sweep expires it.
    #[serde(default = "default_expiration_minutes")]
    pub expiration_minutes: i64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self { expiration_minutes: default_expiration_minutes() }
    }
}

/// Minimum intervals between actions, in seconds. Zero disables a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_buy_same_ticker")]
    pub buy_same_ticker: u64,
    #[serde(default = "default_buy_any_ticker")]
    pub buy_any_ticker: u64,
    #[serde(default = "default_sell_same_ticker")]
    pub sell_same_ticker: u64,
    #[serde(default)]
    pub sell_any_ticker: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            buy_same_ticker: default_buy_same_ticker(),
            buy_any_ticker: default_buy_any_ticker(),
            sell_same_ticker: default_sell_same_ticker(),
            sell_any_ticker: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskControlConfig {
    #[serde(default = "default_max_total_exposure")]
    pub max_total_exposure: f64,
    #[serde(default = "default_max_position_per_ticker")]
    pub max_position_per_ticker: f64,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: u32,
    #[serde(default = "default_max_daily_entries")]
    pub max_daily_entries: u32,
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    /// Daily P&L floor (a negative number). Trading halts at or below it.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,
    /// Price proxy used to project exposure before a fill exists.
    #[serde(default = "default_estimated_price_per_share")]
    pub estimated_price_per_share: f64,
    /// Consecutive losses on one ticker before it is dynamically blacklisted.
    #[serde(default = "default_dynamic_blacklist_losses")]
    pub dynamic_blacklist_losses: u32,
}

impl Default for RiskControlConfig {
    fn default() -> Self {
        Self {
            max_total_exposure: default_max_total_exposure(),
            max_position_per_ticker: default_max_position_per_ticker(),
            max_open_positions: default_max_open_positions(),
            max_daily_entries: default_max_daily_entries(),
            max_daily_trades: default_max_daily_trades(),
            max_consecutive_losses: default_max_consecutive_losses(),
            max_daily_loss: default_max_daily_loss(),
            estimated_price_per_share: default_estimated_price_per_share(),
            dynamic_blacklist_losses: default_dynamic_blacklist_losses(),
        }
    }
}

/// What to do with a webhook arriving while the market is CLOSED or in
/// POST_MARKET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OffHoursAction {
    Reject,
    Queue,
}

impl Default for OffHoursAction {
    fn default() -> Self {
        Self::Reject
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingWindow {
    /// "HH:MM", exchange-local.
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketHoursConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_morning_window")]
    pub morning_window: TradingWindow,
    #[serde(default = "default_afternoon_window")]
    pub afternoon_window: TradingWindow,
    #[serde(default)]
    pub off_hours_action: OffHoursAction,
    /// Exchange holidays (YYYY-MM-DD). Weekends are always closed.
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            morning_window: default_morning_window(),
            afternoon_window: default_afternoon_window(),
            off_hours_action: OffHoursAction::default(),
            holidays: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_csv_path")]
    pub csv_path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { csv_path: default_csv_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// One chat-webhook URL per level (INFO/WARNING/ERROR/CRITICAL). Missing
    /// levels are simply not routed.
    #[serde(default)]
    pub webhook_urls: HashMap<String, String>,
    /// Minutes between repeats of the same (level, title). CRITICAL is never
    /// suppressed.
    #[serde(default = "default_frequency_limits")]
    pub frequency_limits: HashMap<String, u64>,
    #[serde(default)]
    pub email_recipients: Vec<String>,
    #[serde(default)]
    pub email_smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub email_smtp_port: u16,
    #[serde(default)]
    pub email_smtp_user: Option<String>,
    #[serde(default)]
    pub email_smtp_password: Option<String>,
    #[serde(default)]
    pub email_from: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_urls: HashMap::new(),
            frequency_limits: default_frequency_limits(),
            email_recipients: Vec::new(),
            email_smtp_host: None,
            email_smtp_port: default_smtp_port(),
            email_smtp_user: None,
            email_smtp_password: None,
            email_from: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds without a ping before a client is considered inactive.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_seconds: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { timeout_seconds: default_heartbeat_timeout() }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Top-level configuration for the relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub risk_control: RiskControlConfig,
    #[serde(default)]
    pub market_hours: MarketHoursConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl Settings {
    /// Load settings from a YAML file, then apply environment overrides and
    /// validate. A missing file is a startup error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let mut settings: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        settings.apply_env_overrides();
        settings.validate()?;

        info!(
            path = %path.display(),
            bind = %format!("{}:{}", settings.server.host, settings.server.port),
            database = %settings.database.url,
            timezone = %settings.market_hours.timezone,
            "configuration loaded"
        );

        Ok(settings)
    }

    /// Environment variables win over the YAML file for secrets and the
    /// couple of values most likely to differ per deployment.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RELAY_WEBHOOK_SECRET") {
            self.security.webhook_secret = v;
        }
        if let Ok(v) = std::env::var("RELAY_API_KEY") {
            self.security.api_key = v;
        }
        if let Ok(v) = std::env::var("RELAY_ADMIN_PASSWORD") {
            self.security.admin_password = v;
        }
        if let Ok(v) = std::env::var("RELAY_DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("RELAY_BIND_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("RELAY_BIND_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
    }

    /// Refuse to start with missing secrets or an unknown timezone. Exiting
    /// non-zero here is part of the external contract.
    pub fn validate(&self) -> Result<()> {
        if self.security.webhook_secret.is_empty() {
            bail!("security.webhook_secret must be set (or RELAY_WEBHOOK_SECRET)");
        }
        if self.security.api_key.is_empty() {
            bail!("security.api_key must be set (or RELAY_API_KEY)");
        }
        if self.security.admin_password.is_empty() {
            bail!("security.admin_password must be set (or RELAY_ADMIN_PASSWORD)");
        }
        if self.market_hours.timezone.parse::<chrono_tz::Tz>().is_err() {
            bail!("market_hours.timezone is not a valid IANA timezone: {}",
                self.market_hours.timezone);
        }
        if self.signal.expiration_minutes <= 0 {
            bail!("signal.expiration_minutes must be positive");
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

    fn secured() -> Settings {
        let mut s = Settings::default();
        s.security.webhook_secret = "hook".into();
        s.security.api_key = "key".into();
        s.security.admin_password = "pw".into();
        s
    }

    #[test]
    fn defaults_match_contract() {
        let s = Settings::default();
        assert_eq!(s.server.port, 5000);
        assert_eq!(s.signal.expiration_minutes, 15);
        assert_eq!(s.cooldown.buy_same_ticker, 1800);
        assert_eq!(s.cooldown.sell_any_ticker, 0);
        assert_eq!(s.risk_control.max_open_positions, 5);
        assert_eq!(s.risk_control.max_daily_trades, 15);
        assert!((s.risk_control.max_daily_loss + 50_000.0).abs() < f64::EPSILON);
        assert!((s.risk_control.estimated_price_per_share - 1000.0).abs() < f64::EPSILON);
        assert_eq!(s.market_hours.timezone, "Asia/Tokyo");
        assert_eq!(s.market_hours.morning_window.start, "09:30");
        assert_eq!(s.market_hours.afternoon_window.end, "14:30");
        assert_eq!(s.market_hours.off_hours_action, OffHoursAction::Reject);
        assert_eq!(s.heartbeat.timeout_seconds, 300);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = r#"
security:
  webhook_secret: s3cret
  api_key: k
  admin_password: p
cooldown:
  buy_same_ticker: 60
market_hours:
  off_hours_action: QUEUE
  holidays: ["2025-01-01", "2025-01-02"]
"#;
        let s: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(s.cooldown.buy_same_ticker, 60);
        assert_eq!(s.cooldown.buy_any_ticker, 300);
        assert_eq!(s.market_hours.off_hours_action, OffHoursAction::Queue);
        assert_eq!(s.market_hours.holidays.len(), 2);
        assert_eq!(s.server.port, 5000);
        s.validate().unwrap();
    }

    #[test]
    fn validation_rejects_missing_secrets() {
        let s = Settings::default();
        assert!(s.validate().is_err());

        let mut s = secured();
        s.security.api_key.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn validation_rejects_unknown_timezone() {
        let mut s = secured();
        s.market_hours.timezone = "Mars/Olympus_Mons".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn validation_accepts_complete_settings() {
        secured().validate().unwrap();
    }
}
