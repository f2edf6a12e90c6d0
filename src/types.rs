// =============================================================================
// Shared types used across the signal relay
// =============================================================================

use serde::{Deserialize, Serialize};

/// Side of a trading intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Parse the wire form. Anything other than "buy"/"sell" is rejected at
    /// ingress, but rows read back from the store go through here too.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a signal. Transitions are monotonic:
///
///   PENDING -> FETCHED -> EXECUTED
///   PENDING -> FETCHED -> FAILED
///   PENDING -> FAILED | EXPIRED
///
/// EXECUTED, FAILED and EXPIRED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalState {
    Pending,
    Fetched,
    Executed,
    Failed,
    Expired,
}

impl SignalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetched => "fetched",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "fetched" => Some(Self::Fetched),
            "executed" => Some(Self::Executed),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Expired)
    }
}

impl std::fmt::Display for SignalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity routed through the notification fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_roundtrip() {
        assert_eq!(SignalAction::parse("buy"), Some(SignalAction::Buy));
        assert_eq!(SignalAction::parse("sell"), Some(SignalAction::Sell));
        assert_eq!(SignalAction::parse("hold"), None);
        assert_eq!(SignalAction::Buy.as_str(), "buy");
        assert_eq!(SignalAction::Sell.opposite(), SignalAction::Buy);
    }

    #[test]
    fn state_terminality() {
        assert!(!SignalState::Pending.is_terminal());
        assert!(!SignalState::Fetched.is_terminal());
        assert!(SignalState::Executed.is_terminal());
        assert!(SignalState::Failed.is_terminal());
        assert!(SignalState::Expired.is_terminal());
    }

    #[test]
    fn state_serde_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&SignalState::Pending).unwrap(),
            "\"pending\""
        );
        let s: SignalState = serde_json::from_str("\"executed\"").unwrap();
        assert_eq!(s, SignalState::Executed);
    }
}
