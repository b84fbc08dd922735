//! Trade comparison over persisted closed-trade history.

use crate::db::{StoreError, TradeStore};
use crate::domain::{AccountId, AccountType};
use crate::engine::{compare_histories, DemoCandidate, Period, RealHistory, TradeComparison};
use chrono::{Local, NaiveDateTime};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ComparisonService {
    store: Arc<dyn TradeStore>,
}

impl ComparisonService {
    pub fn new(store: Arc<dyn TradeStore>) -> Self {
        Self { store }
    }

    /// Compare live history against the demo pool for the current local
    /// period.
    ///
    /// # Errors
    /// Returns an error if accounts or closed trades cannot be read.
    pub async fn compare(
        &self,
        account: Option<AccountId>,
        period: Period,
    ) -> Result<Vec<TradeComparison>, StoreError> {
        self.compare_at(account, period, Local::now().naive_local())
            .await
    }

    /// As [`compare`](Self::compare) with an explicit local `now`.
    ///
    /// # Errors
    /// Returns an error if accounts or closed trades cannot be read.
    pub async fn compare_at(
        &self,
        account: Option<AccountId>,
        period: Period,
        now: NaiveDateTime,
    ) -> Result<Vec<TradeComparison>, StoreError> {
        let selected: Vec<_> = self
            .store
            .load_all_accounts()
            .await?
            .into_iter()
            .filter(|record| match record.account_type {
                Some(AccountType::Real) => account.map_or(true, |id| id == record.id),
                // every account not typed REAL competes as a demo counterpart
                Some(AccountType::Demo) | None => true,
            })
            .collect();
        let histories =
            try_join_all(selected.iter().map(|r| self.store.load_closed_trades(r.id))).await?;

        let mut real = Vec::new();
        let mut demo_pool = Vec::new();
        for (record, trades) in selected.into_iter().zip(histories) {
            let name = record.name.clone().unwrap_or_else(|| record.id.to_string());
            if record.account_type == Some(AccountType::Real) {
                real.push(RealHistory {
                    account_id: record.id,
                    account_name: name,
                    trades,
                });
            } else {
                demo_pool.extend(trades.into_iter().map(|trade| DemoCandidate {
                    account_id: record.id,
                    account_name: name.clone(),
                    trade,
                }));
            }
        }

        debug!(
            real_accounts = real.len(),
            demo_trades = demo_pool.len(),
            period = ?period,
            "Comparing closed trades"
        );
        Ok(compare_histories(&real, &demo_pool, period.start(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AccountRecord, MemoryStore};
    use crate::domain::{ClosedTrade, MagicNumber, Side, Ticket};
    use crate::engine::MatchStatus;
    use chrono::{NaiveDate, Utc};

    fn record(id: i64, account_type: Option<AccountType>) -> AccountRecord {
        AccountRecord {
            id: AccountId::new(id),
            broker: "Broker".into(),
            currency: "EUR".into(),
            balance: 1000.0,
            equity: 1000.0,
            name: None,
            account_type,
            registered_at: Utc::now(),
            last_seen: None,
            last_error: None,
            last_error_at: None,
        }
    }

    fn closed(ticket: i64, open_time: &str, close_time: &str, open_price: f64) -> ClosedTrade {
        ClosedTrade {
            ticket: Ticket::new(ticket),
            symbol: "EURUSD".into(),
            side: Side::Buy,
            volume: 0.1,
            open_price,
            close_price: 1.21,
            open_time: Some(open_time.into()),
            close_time: Some(close_time.into()),
            stop_loss: None,
            take_profit: None,
            profit: 5.0,
            swap: 0.0,
            commission: 0.0,
            magic_number: MagicNumber::new(3),
            comment: None,
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 15)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap()
    }

    fn service() -> ComparisonService {
        let store = MemoryStore::new()
            .with_account(record(1, Some(AccountType::Real)))
            .with_account(record(2, Some(AccountType::Demo)))
            .with_account(record(3, None))
            .with_account(record(4, Some(AccountType::Real)))
            .with_closed_trades(
                AccountId::new(1),
                vec![
                    closed(10, "2026.03.15 09:00:00", "2026.03.15 10:00:00", 1.2005),
                    closed(11, "2026.02.01 09:00:00", "2026.02.01 10:00:00", 1.3),
                ],
            )
            .with_closed_trades(
                AccountId::new(2),
                vec![closed(20, "2026.03.15 09:00:30", "2026.03.15 10:00:10", 1.2)],
            )
            .with_closed_trades(
                AccountId::new(3),
                vec![closed(30, "2026.02.01 09:00:00", "2026.02.01 10:00:00", 1.3)],
            )
            .with_closed_trades(
                AccountId::new(4),
                vec![closed(40, "2026.03.14 09:00:00", "2026.03.14 10:00:00", 1.2)],
            );
        ComparisonService::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_untyped_accounts_join_demo_pool() {
        let results = service()
            .compare_at(Some(AccountId::new(1)), Period::All, now())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].real_trade.ticket, Ticket::new(10));
        assert_eq!(results[0].status, MatchStatus::Matched);
        assert_eq!(results[0].demo_account_id, Some(AccountId::new(2)));

        assert_eq!(results[1].real_trade.ticket, Ticket::new(11));
        assert_eq!(results[1].status, MatchStatus::Matched);
        assert_eq!(results[1].demo_account_id, Some(AccountId::new(3)));
    }

    #[tokio::test]
    async fn test_period_and_account_filters() {
        let today = service().compare_at(None, Period::Today, now()).await.unwrap();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].real_account_id, AccountId::new(1));

        let month = service().compare_at(None, Period::ThisMonth, now()).await.unwrap();
        let tickets: Vec<i64> = month.iter().map(|c| c.real_trade.ticket.as_i64()).collect();
        assert_eq!(tickets, vec![10, 40]);
    }
}
