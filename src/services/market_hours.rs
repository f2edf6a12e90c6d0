// =============================================================================
// Market-hours gate — session classification and the safe trading window
// =============================================================================
//
// Sessions (exchange-local time, Tokyo cash equities):
//   < 08:00 PRE_MARKET | < 09:00 MORNING_AUCTION | < 11:30 MORNING_TRADING
//   < 12:30 LUNCH_BREAK | < 15:00 AFTERNOON_TRADING | else POST_MARKET
//   CLOSED on weekends and configured holidays.
//
// The safe window is narrower than the sessions to sidestep open/close
// volatility.
// =============================================================================

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

use crate::config::{MarketHoursConfig, OffHoursAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSession {
    PreMarket,
    MorningAuction,
    MorningTrading,
    LunchBreak,
    AfternoonAuction,
    AfternoonTrading,
    PostMarket,
    Closed,
}

impl MarketSession {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreMarket => "pre_market",
            Self::MorningAuction => "morning_auction",
            Self::MorningTrading => "morning_trading",
            Self::LunchBreak => "lunch_break",
            Self::AfternoonAuction => "afternoon_auction",
            Self::AfternoonTrading => "afternoon_trading",
            Self::PostMarket => "post_market",
            Self::Closed => "closed",
        }
    }
}

/// What ingress should do with a signal arriving at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketDecision {
    /// Inside the safe window — store and dispatch normally.
    Accept,
    /// Store as PENDING; the executor picks it up once the validator passes.
    Queue { reason: &'static str },
    /// Refuse the webhook outright.
    Reject { reason: &'static str },
}

/// Serialized for /status.
#[derive(Debug, Clone, Serialize)]
pub struct MarketStatus {
    pub session: &'static str,
    pub is_trading_day: bool,
    pub is_safe_trading_window: bool,
    pub current_time: String,
}

pub struct MarketHoursService {
    tz: Tz,
    morning_start: NaiveTime,
    morning_end: NaiveTime,
    afternoon_start: NaiveTime,
    afternoon_end: NaiveTime,
    off_hours_action: OffHoursAction,
    holidays: HashSet<NaiveDate>,
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .with_context(|| format!("invalid HH:MM time in market_hours config: {s}"))
}

impl MarketHoursService {
    pub fn new(config: &MarketHoursConfig) -> Result<Self> {
        let tz: Tz = config
            .timezone
            .parse()
            .ok()
            .with_context(|| format!("unknown timezone: {}", config.timezone))?;

        Ok(Self {
            tz,
            morning_start: parse_hhmm(&config.morning_window.start)?,
            morning_end: parse_hhmm(&config.morning_window.end)?,
            afternoon_start: parse_hhmm(&config.afternoon_window.start)?,
            afternoon_end: parse_hhmm(&config.afternoon_window.end)?,
            off_hours_action: config.off_hours_action,
            holidays: config.holidays.iter().copied().collect(),
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn now_local(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        !self.holidays.contains(&date)
    }

    pub fn session_at(&self, local: DateTime<Tz>) -> MarketSession {
        if !self.is_trading_day(local.date_naive()) {
            return MarketSession::Closed;
        }

        let t = local.time();
        let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default();

        if t < at(8, 0) {
            MarketSession::PreMarket
        } else if t < at(9, 0) {
            MarketSession::MorningAuction
        } else if t < at(11, 30) {
            MarketSession::MorningTrading
        } else if t < at(12, 30) {
            MarketSession::LunchBreak
        } else if t < at(15, 0) {
            MarketSession::AfternoonTrading
        } else {
            MarketSession::PostMarket
        }
    }

    /// Inside one of the two configured safe sub-windows on a trading day.
    pub fn is_safe_window_at(&self, local: DateTime<Tz>) -> bool {
        if !self.is_trading_day(local.date_naive()) {
            return false;
        }
        let t = local.time();
        (self.morning_start <= t && t <= self.morning_end)
            || (self.afternoon_start <= t && t <= self.afternoon_end)
    }

    pub fn is_safe_window_now(&self) -> bool {
        self.is_safe_window_at(self.now_local())
    }

    /// Ingress decision for a signal arriving at `local`.
    pub fn decide_at(&self, local: DateTime<Tz>) -> MarketDecision {
        let off_hours = |reason| match self.off_hours_action {
            OffHoursAction::Reject => MarketDecision::Reject { reason },
            OffHoursAction::Queue => MarketDecision::Queue { reason },
        };

        match self.session_at(local) {
            MarketSession::Closed => off_hours("market_closed"),
            MarketSession::PreMarket => off_hours("pre_market"),
            MarketSession::PostMarket => off_hours("post_market"),
            MarketSession::LunchBreak => MarketDecision::Queue { reason: "lunch_break" },
            MarketSession::MorningAuction | MarketSession::AfternoonAuction => {
                MarketDecision::Queue { reason: "auction_period" }
            }
            MarketSession::MorningTrading | MarketSession::AfternoonTrading => {
                if self.is_safe_window_at(local) {
                    MarketDecision::Accept
                } else {
                    MarketDecision::Queue { reason: "outside_safe_window" }
                }
            }
        }
    }

    pub fn decide_now(&self) -> MarketDecision {
        self.decide_at(self.now_local())
    }

    pub fn status(&self) -> MarketStatus {
        let now = self.now_local();
        MarketStatus {
            session: self.session_at(now).as_str(),
            is_trading_day: self.is_trading_day(now.date_naive()),
            is_safe_trading_window: self.is_safe_window_at(now),
            current_time: now.to_rfc3339(),
        }
    }

    /// The market-local calendar date of `instant`; daily limits and the
    /// day-trading guard all operate on this date, not the UTC one.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// UTC bounds of the market-local calendar day containing `instant`.
    pub fn local_day_bounds(&self, instant: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let midnight = self.local_date(instant).and_hms_opt(0, 0, 0).unwrap_or_default();
        let start = self
            .tz
            .from_local_datetime(&midnight)
            .single()
            .unwrap_or_else(|| self.tz.from_utc_datetime(&midnight));
        let end = start + chrono::Duration::days(1);
        (start.with_timezone(&Utc), end.with_timezone(&Utc))
    }
}

// =============================================================================
// Tests
// =============================================================================
