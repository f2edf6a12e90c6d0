// =============================================================================
// Notification fan-out — level-routed chat webhooks and email
// =============================================================================
//
// Routing contract:
//   - each level may have one chat-webhook URL; unset levels are not routed;
//   - ERROR and CRITICAL additionally go to email;
//   - repeats of the same (level, title) are suppressed inside a per-level
//     minutes window, except CRITICAL which always sends;
//   - dispatch is fire-and-forget: the request path never waits on transport
//     I/O, and transport failures are only logged.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use serde_json::json;
use tracing::{debug, error, info};

use crate::config::AlertsConfig;
use crate::ephemeral::TtlStore;
use crate::types::AlertLevel;

/// Last-sent markers live this long in the ephemeral store.
const LAST_SENT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Suppression window when a level has no configured limit.
const DEFAULT_LIMIT_MINUTES: u64 = 30;

#[async_trait]
trait AlertChannel: Send + Sync {
    fn name(&self) -> &'static str;
    fn accepts(&self, level: AlertLevel) -> bool;
    async fn send(
        &self,
        level: AlertLevel,
        title: &str,
        fields: &[(String, String)],
    ) -> anyhow::Result<()>;
}

// -----------------------------------------------------------------------------
// Chat webhook channel
// -----------------------------------------------------------------------------

struct ChatWebhookChannel {
    client: reqwest::Client,
    urls: HashMap<AlertLevel, String>,
}

fn level_color(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::Info => "#36a64f",
        AlertLevel::Warning => "warning",
        AlertLevel::Error => "danger",
        AlertLevel::Critical => "#FF0000",
    }
}

#[async_trait]
impl AlertChannel for ChatWebhookChannel {
    fn name(&self) -> &'static str {
        "chat_webhook"
    }

    fn accepts(&self, level: AlertLevel) -> bool {
        self.urls.contains_key(&level)
    }

    async fn send(
        &self,
        level: AlertLevel,
        title: &str,
        fields: &[(String, String)],
    ) -> anyhow::Result<()> {
        let Some(url) = self.urls.get(&level) else {
            return Ok(());
        };

        let payload = json!({
            "username": "signal-relay",
            "attachments": [{
                "color": level_color(level),
                "title": format!("[{level}] {title}"),
                "fields": fields.iter().map(|(t, v)| json!({
                    "title": t, "value": v, "short": true,
                })).collect::<Vec<_>>(),
                "footer": "signal-relay",
                "ts": Utc::now().timestamp(),
            }],
        });

        let response = self
            .client
            .post(url)
            .json(&payload)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("chat webhook returned HTTP {}", response.status());
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Email channel (ERROR and CRITICAL only)
// -----------------------------------------------------------------------------

struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    fn from_config(config: &AlertsConfig) -> Option<Self> {
        let host = config.email_smtp_host.as_deref()?;
        let from: Mailbox = config.email_from.as_deref()?.parse().ok()?;
        let to: Vec<Mailbox> = config
            .email_recipients
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect();
        if to.is_empty() {
            return None;
        }

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .ok()?
            .port(config.email_smtp_port);
        if let (Some(user), Some(pass)) = (&config.email_smtp_user, &config.email_smtp_password)
        {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Some(Self { transport: builder.build(), from, to })
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn accepts(&self, level: AlertLevel) -> bool {
        matches!(level, AlertLevel::Error | AlertLevel::Critical)
    }

    async fn send(
        &self,
        level: AlertLevel,
        title: &str,
        fields: &[(String, String)],
    ) -> anyhow::Result<()> {
        let body = fields
            .iter()
            .map(|(t, v)| format!("{t}: {v}"))
            .collect::<Vec<_>>()
            .join("\n");

        for recipient in &self.to {
            let email = Message::builder()
                .from(self.from.clone())
                .to(recipient.clone())
                .subject(format!("[signal-relay] {level} - {title}"))
                .body(body.clone())?;
            self.transport.send(email).await?;
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Notifier
// -----------------------------------------------------------------------------

struct NotifierInner {
    enabled: bool,
    channels: Vec<Box<dyn AlertChannel>>,
    store: Arc<TtlStore>,
    frequency_limits: HashMap<AlertLevel, u64>,
}

/// Cheap-to-clone handle over the configured channels.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

impl Notifier {
    pub fn from_config(config: &AlertsConfig, store: Arc<TtlStore>) -> Self {
        let mut channels: Vec<Box<dyn AlertChannel>> = Vec::new();

        let urls: HashMap<AlertLevel, String> = config
            .webhook_urls
            .iter()
            .filter_map(|(level, url)| {
                let level = serde_json::from_value(json!(level)).ok()?;
                Some((level, url.clone()))
            })
            .collect();
        if !urls.is_empty() {
            channels.push(Box::new(ChatWebhookChannel { client: reqwest::Client::new(), urls }));
        }

        if let Some(email) = EmailChannel::from_config(config) {
            channels.push(Box::new(email));
        }

        let frequency_limits = config
            .frequency_limits
            .iter()
            .filter_map(|(level, minutes)| {
                let level = serde_json::from_value(json!(level)).ok()?;
                Some((level, *minutes))
            })
            .collect();

        info!(channels = channels.len(), enabled = config.enabled, "notifier configured");
        Self {
            inner: Arc::new(NotifierInner {
                enabled: config.enabled,
                channels,
                store,
                frequency_limits,
            }),
        }
    }

    /// Fire-and-forget entry point used by the request path.
    pub fn dispatch(&self, level: AlertLevel, title: &str, fields: Vec<(String, String)>) {
        let inner = Arc::clone(&self.inner);
        let title = title.to_string();
        tokio::spawn(async move {
            inner.send_now(level, &title, &fields).await;
        });
    }

    /// Awaitable core for callers that want delivery before proceeding
    /// (tests, shutdown paths).
    pub async fn send_now(&self, level: AlertLevel, title: &str, fields: &[(String, String)]) {
        self.inner.send_now(level, title, fields).await;
    }
}

impl NotifierInner {
    async fn send_now(&self, level: AlertLevel, title: &str, fields: &[(String, String)]) {
        if !self.enabled {
            return;
        }
        if !self.should_send(level, title) {
            info!(%level, title, "notification suppressed by frequency limit");
            return;
        }

        let mut delivered = false;
        for channel in &self.channels {
            if !channel.accepts(level) {
                continue;
            }
            match channel.send(level, title, fields).await {
                Ok(()) => {
                    delivered = true;
                    debug!(channel = channel.name(), %level, title, "notification sent");
                }
                Err(e) => {
                    error!(channel = channel.name(), %level, title, error = %e,
                        "notification delivery failed");
                }
            }
        }

        if delivered {
            self.record_sent(level, title);
        }
    }

    /// Frequency limiter over the ephemeral store. CRITICAL always passes;
    /// an unreadable marker fails open.
    fn should_send(&self, level: AlertLevel, title: &str) -> bool {
        if level == AlertLevel::Critical {
            return true;
        }

        let key = format!("notification:last:{level}:{title}");
        let Some(raw) = self.store.get(&key) else { return true };
        let Ok(last) = raw.parse::<DateTime<Utc>>() else { return true };

        let limit = self
            .frequency_limits
            .get(&level)
            .copied()
            .unwrap_or(DEFAULT_LIMIT_MINUTES);
        let elapsed_minutes = (Utc::now() - last).num_seconds() as f64 / 60.0;
        elapsed_minutes >= limit as f64
    }

    fn record_sent(&self, level: AlertLevel, title: &str) {
        self.store.set(
            &format!("notification:last:{level}:{title}"),
            &Utc::now().to_rfc3339(),
            LAST_SENT_RETENTION,
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier(store: Arc<TtlStore>) -> NotifierInner {
        NotifierInner {
            enabled: true,
            channels: Vec::new(),
            store,
            frequency_limits: HashMap::from([
                (AlertLevel::Info, 60),
                (AlertLevel::Warning, 30),
                (AlertLevel::Error, 15),
            ]),
        }
    }

    #[test]
    fn limiter_suppresses_repeats_within_window() {
        let store = Arc::new(TtlStore::new());
        let n = notifier(store.clone());

        assert!(n.should_send(AlertLevel::Warning, "heartbeat lost"));
        n.record_sent(AlertLevel::Warning, "heartbeat lost");
        assert!(!n.should_send(AlertLevel::Warning, "heartbeat lost"));

        // A different title is tracked independently.
        assert!(n.should_send(AlertLevel::Warning, "other event"));
        // So is the same title at another level.
        assert!(n.should_send(AlertLevel::Error, "heartbeat lost"));
    }

    #[test]
    fn critical_is_never_suppressed() {
        let store = Arc::new(TtlStore::new());
        let n = notifier(store);

        n.record_sent(AlertLevel::Critical, "kill switch");
        assert!(n.should_send(AlertLevel::Critical, "kill switch"));
    }

    #[test]
    fn stale_marker_reopens_the_window() {
        let store = Arc::new(TtlStore::new());
        let n = notifier(store.clone());

        // A marker from 31 minutes ago is past the WARNING window.
        let old = (Utc::now() - chrono::Duration::minutes(31)).to_rfc3339();
        store.set("notification:last:WARNING:event", &old, Duration::from_secs(600));
        assert!(n.should_send(AlertLevel::Warning, "event"));

        // An unparsable marker fails open.
        store.set("notification:last:WARNING:bad", "not-a-time", Duration::from_secs(600));
        assert!(n.should_send(AlertLevel::Warning, "bad"));
    }

    #[tokio::test]
    async fn disabled_notifier_is_silent() {
        let store = Arc::new(TtlStore::new());
        let mut n = notifier(store.clone());
        n.enabled = false;

        n.send_now(AlertLevel::Critical, "kill switch", &[]).await;
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn config_levels_parse_into_channel_routing() {
        let mut config = AlertsConfig::default();
        config.webhook_urls.insert("ERROR".into(), "https://chat.example/e".into());
        config.webhook_urls.insert("CRITICAL".into(), "https://chat.example/c".into());

        let n = Notifier::from_config(&config, Arc::new(TtlStore::new()));
        assert_eq!(n.inner.channels.len(), 1);
        assert!(n.inner.channels[0].accepts(AlertLevel::Error));
        assert!(n.inner.channels[0].accepts(AlertLevel::Critical));
        assert!(!n.inner.channels[0].accepts(AlertLevel::Info));
    }
}
