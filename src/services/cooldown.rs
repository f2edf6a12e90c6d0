// =============================================================================
// Cooldown gate — minimum intervals between actions, enforced by TTL keys
// =============================================================================
//
// Key shapes:
//   cooldown:<action>:<ticker>   same-ticker rule
//   cooldown:<action>:global     any-ticker rule
//
// The same-ticker rule is checked first; a zero duration disables a rule.
// Keys are armed only after the signal has been persisted.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CooldownConfig;
use crate::ephemeral::TtlStore;
use crate::types::SignalAction;

/// Verdict of the cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownVerdict {
    Allowed,
    Blocked { reason: &'static str, retry_after: u64 },
}

/// One active cooldown key, for the admin listing.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveCooldown {
    pub key: String,
    pub action: String,
    pub ticker: String,
    pub remaining_seconds: u64,
}

#[derive(Clone)]
pub struct CooldownService {
    store: Arc<TtlStore>,
    config: CooldownConfig,
}

impl CooldownService {
    pub fn new(store: Arc<TtlStore>, config: CooldownConfig) -> Self {
        Self { store, config }
    }

    fn durations(&self, action: SignalAction) -> (u64, u64) {
        match action {
            SignalAction::Buy => (self.config.buy_same_ticker, self.config.buy_any_ticker),
            SignalAction::Sell => (self.config.sell_same_ticker, self.config.sell_any_ticker),
        }
    }

    /// Check both rules for (action, ticker).
    pub fn check(&self, ticker: &str, action: SignalAction) -> CooldownVerdict {
        let (same_ticker, any_ticker) = self.durations(action);

        if same_ticker > 0 {
            let key = format!("cooldown:{action}:{ticker}");
            if let Some(ttl) = self.store.ttl_seconds(&key) {
                warn!(ticker, %action, retry_after = ttl, "same-ticker cooldown active");
                return CooldownVerdict::Blocked {
                    reason: "cooldown_same_ticker",
                    retry_after: ttl,
                };
            }
        }

        if any_ticker > 0 {
            // Any live key for this action blocks; report the longest wait.
            let max_ttl = self
                .store
                .scan_prefix(&format!("cooldown:{action}:"))
                .into_iter()
                .map(|(_, ttl)| ttl)
                .max();
            if let Some(ttl) = max_ttl {
                warn!(%action, retry_after = ttl, "any-ticker cooldown active");
                return CooldownVerdict::Blocked {
                    reason: "cooldown_any_ticker",
                    retry_after: ttl,
                };
            }
        }

        CooldownVerdict::Allowed
    }

    /// Arm the TTL keys after a signal was accepted and persisted.
    pub fn arm(&self, ticker: &str, action: SignalAction) {
        let (same_ticker, any_ticker) = self.durations(action);

        if same_ticker > 0 {
            self.store.set(
                &format!("cooldown:{action}:{ticker}"),
                "1",
                Duration::from_secs(same_ticker),
            );
            debug!(ticker, %action, seconds = same_ticker, "same-ticker cooldown armed");
        }
        if any_ticker > 0 {
            self.store.set(
                &format!("cooldown:{action}:global"),
                "1",
                Duration::from_secs(any_ticker),
            );
            debug!(%action, seconds = any_ticker, "global cooldown armed");
        }
    }

    /// Manual reset; `*` acts as a wildcard on either axis.
    pub fn reset(&self, ticker: &str, action: &str) -> usize {
        let removed = match (ticker, action) {
            ("*", "*") => self.store.remove_where(|k| k.starts_with("cooldown:")),
            ("*", action) => {
                let prefix = format!("cooldown:{action}:");
                self.store.remove_where(|k| k.starts_with(&prefix))
            }
            (ticker, "*") => {
                let suffix = format!(":{ticker}");
                self.store
                    .remove_where(|k| k.starts_with("cooldown:") && k.ends_with(&suffix))
            }
            (ticker, action) => {
                usize::from(self.store.remove(&format!("cooldown:{action}:{ticker}")))
            }
        };

        info!(ticker, action, removed, "cooldown reset");
        removed
    }

    /// All live cooldown keys with remaining TTLs.
    pub fn active(&self) -> Vec<ActiveCooldown> {
        self.store
            .scan_prefix("cooldown:")
            .into_iter()
            .filter_map(|(key, ttl)| {
                let mut parts = key.splitn(3, ':');
                let _ = parts.next()?;
                let action = parts.next()?.to_string();
                let ticker = parts.next()?.to_string();
                Some(ActiveCooldown { key: key.clone(), action, ticker, remaining_seconds: ttl })
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn service(config: CooldownConfig) -> CooldownService {
        CooldownService::new(Arc::new(TtlStore::new()), config)
    }

    #[test]
    fn same_ticker_blocks_with_retry_after() {
        let svc = service(CooldownConfig {
            buy_same_ticker: 1800,
            buy_any_ticker: 0,
            sell_same_ticker: 0,
            sell_any_ticker: 0,
        });

        assert_eq!(svc.check("7203", SignalAction::Buy), CooldownVerdict::Allowed);
        svc.arm("7203", SignalAction::Buy);

        match svc.check("7203", SignalAction::Buy) {
            CooldownVerdict::Blocked { reason, retry_after } => {
                assert_eq!(reason, "cooldown_same_ticker");
                assert!(retry_after > 1700 && retry_after <= 1800);
            }
            other => panic!("expected blocked, got {other:?}"),
        }

        // A different ticker is unaffected with the global rule disabled.
        assert_eq!(svc.check("9984", SignalAction::Buy), CooldownVerdict::Allowed);
        // Sells are a separate rule set.
        assert_eq!(svc.check("7203", SignalAction::Sell), CooldownVerdict::Allowed);
    }

    #[test]
    fn global_rule_blocks_other_tickers() {
        let svc = service(CooldownConfig {
            buy_same_ticker: 1800,
            buy_any_ticker: 300,
            sell_same_ticker: 0,
            sell_any_ticker: 0,
        });

        svc.arm("7203", SignalAction::Buy);
        match svc.check("9984", SignalAction::Buy) {
            CooldownVerdict::Blocked { reason, .. } => assert_eq!(reason, "cooldown_any_ticker"),
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn zero_durations_disable_rules() {
        let svc = service(CooldownConfig {
            buy_same_ticker: 0,
            buy_any_ticker: 0,
            sell_same_ticker: 0,
            sell_any_ticker: 0,
        });
        svc.arm("7203", SignalAction::Buy);
        assert_eq!(svc.check("7203", SignalAction::Buy), CooldownVerdict::Allowed);
        assert!(svc.active().is_empty());
    }

    #[test]
    fn reset_specific_and_wildcards() {
        let svc = service(CooldownConfig {
            buy_same_ticker: 600,
            buy_any_ticker: 300,
            sell_same_ticker: 600,
            sell_any_ticker: 0,
        });
        svc.arm("7203", SignalAction::Buy); // buy:7203 + buy:global
        svc.arm("9984", SignalAction::Buy); // buy:9984 + buy:global (refreshed)
        svc.arm("7203", SignalAction::Sell); // sell:7203

        // Specific reset removes exactly that key: the sell cooldown for the
        // same ticker survives, and the global buy rule still applies.
        assert_eq!(svc.reset("7203", "buy"), 1);
        assert!(matches!(
            svc.check("7203", SignalAction::Sell),
            CooldownVerdict::Blocked { reason: "cooldown_same_ticker", .. }
        ));
        assert!(matches!(
            svc.check("7203", SignalAction::Buy),
            CooldownVerdict::Blocked { reason: "cooldown_any_ticker", .. }
        ));

        // Ticker wildcard clears the remaining sell key for 7203.
        assert_eq!(svc.reset("7203", "*"), 1);

        // Action wildcard clears every remaining buy key.
        assert_eq!(svc.reset("*", "buy"), 2);
        assert!(svc.active().is_empty());
    }

    #[test]
    fn active_listing_parses_keys() {
        let svc = service(CooldownConfig {
            buy_same_ticker: 600,
            buy_any_ticker: 300,
            sell_same_ticker: 0,
            sell_any_ticker: 0,
        });
        svc.arm("7203", SignalAction::Buy);

        let active = svc.active();
        assert_eq!(active.len(), 2);
        assert!(active.iter().any(|c| c.ticker == "7203" && c.action == "buy"));
        assert!(active.iter().any(|c| c.ticker == "global" && c.action == "buy"));
        assert!(active.iter().all(|c| c.remaining_seconds > 0));
    }
}
