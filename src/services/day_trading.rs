// =============================================================================
// Day-trading guard — no opposite-side round trip within one trading day
// =============================================================================
//
// Cash-equity settlement rules forbid buying back a ticker sold earlier the
// same day (and selling one bought the same day). The guard scans today's
// execution log for the opposite action and reports the offending fill time.
// =============================================================================

use chrono::{DateTime, Utc};

use crate::error::ApiError;
use crate::services::market_hours::MarketHoursService;
use crate::store::executions::ExecutionStore;
use crate::types::SignalAction;

#[derive(Clone)]
pub struct DayTradingService {
    executions: ExecutionStore,
}

impl DayTradingService {
    pub fn new(executions: ExecutionStore) -> Self {
        Self { executions }
    }

    /// `Ok(())` when the order is clean; `Err(reason)` names the offending
    /// same-day fill. "Today" is the market-local calendar day of `now`.
    pub async fn check(
        &self,
        ticker: &str,
        action: SignalAction,
        market_hours: &MarketHoursService,
        now: DateTime<Utc>,
    ) -> Result<Result<(), String>, ApiError> {
        let (day_start, day_end) = market_hours.local_day_bounds(now);
        let fills = self.executions.fills_between(ticker, day_start, day_end).await?;

        let opposite = action.opposite().as_str();
        let last_opposite = fills
            .iter()
            .filter(|f| f.action == opposite)
            .max_by_key(|f| f.executed_at);

        match last_opposite {
            Some(fill) => {
                let at = fill
                    .executed_at
                    .with_timezone(&market_hours.timezone())
                    .format("%H:%M:%S");
                let verb = match action {
                    SignalAction::Buy => "sold",
                    SignalAction::Sell => "bought",
                };
                Ok(Err(format!(
                    "{ticker} was {verb} today at {at}; same-day round trips are not allowed"
                )))
            }
            None => Ok(Ok(())),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketHoursConfig;
    use crate::db::Database;
    use crate::store::executions::{insert, ExecutionRow};
    use chrono::Duration;

    fn fill(id: &str, ticker: &str, action: &str, at: DateTime<Utc>) -> ExecutionRow {
        ExecutionRow {
            execution_id: id.to_string(),
            signal_id: format!("sig_{id}"),
            order_id: None,
            action: action.to_string(),
            ticker: ticker.to_string(),
            quantity: 100,
            price: 1850.0,
            commission: 0.0,
            total_amount: 185_000.0,
            realized_pnl: None,
            position_effect: if action == "buy" { "open" } else { "close" }.to_string(),
            executed_at: at,
        }
    }

    async fn setup() -> (Database, DayTradingService, MarketHoursService) {
        let db = Database::connect_in_memory().await.unwrap();
        let svc = DayTradingService::new(ExecutionStore::new(db.pool.clone()));
        let hours = MarketHoursService::new(&MarketHoursConfig::default()).unwrap();
        (db, svc, hours)
    }

    #[tokio::test]
    async fn buy_after_same_day_sell_is_blocked() {
        let (db, svc, hours) = setup().await;
        let now = Utc::now();

        let mut conn = db.pool.acquire().await.unwrap();
        insert(&mut conn, &fill("e1", "7203", "sell", now - Duration::minutes(30)), now)
            .await
            .unwrap();
        drop(conn);

        let verdict = svc.check("7203", SignalAction::Buy, &hours, now).await.unwrap();
        let reason = verdict.unwrap_err();
        assert!(reason.contains("7203"));
        assert!(reason.contains("sold today"));

        // Selling again the same day is the same side — allowed by this guard.
        let verdict = svc.check("7203", SignalAction::Sell, &hours, now).await.unwrap();
        assert!(verdict.is_ok());
    }

    #[tokio::test]
    async fn sell_after_same_day_buy_is_blocked() {
        let (db, svc, hours) = setup().await;
        let now = Utc::now();

        let mut conn = db.pool.acquire().await.unwrap();
        insert(&mut conn, &fill("e1", "7203", "buy", now - Duration::minutes(30)), now)
            .await
            .unwrap();
        drop(conn);

        let verdict = svc.check("7203", SignalAction::Sell, &hours, now).await.unwrap();
        assert!(verdict.unwrap_err().contains("bought today"));
    }

    #[tokio::test]
    async fn previous_day_fills_do_not_trigger() {
        let (db, svc, hours) = setup().await;
        let now = Utc::now();

        let mut conn = db.pool.acquire().await.unwrap();
        insert(&mut conn, &fill("e1", "7203", "sell", now - Duration::days(2)), now)
            .await
            .unwrap();
        drop(conn);

        let verdict = svc.check("7203", SignalAction::Buy, &hours, now).await.unwrap();
        assert!(verdict.is_ok());
    }

    #[tokio::test]
    async fn other_tickers_are_independent() {
        let (db, svc, hours) = setup().await;
        let now = Utc::now();

        let mut conn = db.pool.acquire().await.unwrap();
        insert(&mut conn, &fill("e1", "9984", "sell", now - Duration::minutes(5)), now)
            .await
            .unwrap();
        drop(conn);

        let verdict = svc.check("7203", SignalAction::Buy, &hours, now).await.unwrap();
        assert!(verdict.is_ok());
    }
}
