//! Closed-trade history merging keyed on ticket number.

use crate::db::{StoreError, TradeStore};
use crate::domain::{AccountId, ClosedTrade, Ticket};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Idempotent merge of closed-trade batches into the store.
///
/// The ticket is the only dedup key: a resent ticket with different fields
/// leaves the stored row untouched.
#[derive(Debug, Clone)]
pub struct ClosedTradeDeduplicator {
    store: Arc<dyn TradeStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeResult {
    pub received: usize,
    pub duplicates: usize,
    pub inserted: usize,
}

impl ClosedTradeDeduplicator {
    pub fn new(store: Arc<dyn TradeStore>) -> Self {
        Self { store }
    }

    /// Insert the trades of `batch` whose ticket is not yet recorded for the
    /// account. Within the batch the first occurrence of a ticket wins.
    ///
    /// # Errors
    /// Returns an error if the ticket lookup or the insert fails.
    pub async fn merge(
        &self,
        account: AccountId,
        batch: &[ClosedTrade],
    ) -> Result<MergeResult, StoreError> {
        if batch.is_empty() {
            return Ok(MergeResult::default());
        }

        let mut known: HashSet<Ticket> = self.store.existing_tickets_for(account).await?;
        let (fresh, duplicates): (Vec<&ClosedTrade>, Vec<&ClosedTrade>) =
            batch.iter().partition(|t| known.insert(t.ticket));

        let fresh: Vec<ClosedTrade> = fresh.into_iter().cloned().collect();
        let inserted = if fresh.is_empty() {
            0
        } else {
            self.store.bulk_insert_closed_trades(account, &fresh).await?
        };

        info!(
            account_id = %account,
            received = batch.len(),
            duplicates = duplicates.len(),
            inserted,
            "Merged closed-trade batch"
        );

        Ok(MergeResult {
            received: batch.len(),
            duplicates: duplicates.len(),
            inserted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::domain::{MagicNumber, Side};

    fn closed(ticket: i64, profit: f64) -> ClosedTrade {
        ClosedTrade {
            ticket: Ticket::new(ticket),
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: 0.1,
            open_price: 1.1,
            close_price: 1.2,
            open_time: Some("2026.01.01 10:00:00".to_string()),
            close_time: Some("2026.01.01 11:00:00".to_string()),
            stop_loss: None,
            take_profit: None,
            profit,
            swap: 0.0,
            commission: 0.0,
            magic_number: MagicNumber::new(77),
            comment: None,
        }
    }

    fn batch(tickets: &[i64]) -> Vec<ClosedTrade> {
        tickets.iter().map(|t| closed(*t, 10.0)).collect()
    }

    #[tokio::test]
    async fn test_replay_inserts_nothing() {
        let store = Arc::new(MemoryStore::new());
        let dedup = ClosedTradeDeduplicator::new(store.clone());
        let account = AccountId::new(1001);

        let first = dedup.merge(account, &batch(&[1, 2, 3])).await.unwrap();
        let second = dedup.merge(account, &batch(&[1, 2, 3])).await.unwrap();

        assert_eq!(first.inserted, 3);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(store.load_closed_trades(account).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_overlapping_batches() {
        let store = Arc::new(MemoryStore::new());
        let dedup = ClosedTradeDeduplicator::new(store.clone());
        let account = AccountId::new(1001);

        assert_eq!(dedup.merge(account, &batch(&[1, 2, 3])).await.unwrap().inserted, 3);
        assert_eq!(dedup.merge(account, &batch(&[2, 3, 4])).await.unwrap().inserted, 1);

        let tickets = store.existing_tickets_for(account).await.unwrap();
        let expected: HashSet<Ticket> = [1, 2, 3, 4].into_iter().map(Ticket::new).collect();
        assert_eq!(tickets, expected);
    }

    #[tokio::test]
    async fn test_resent_ticket_keeps_first_values() {
        let store = Arc::new(MemoryStore::new());
        let dedup = ClosedTradeDeduplicator::new(store.clone());
        let account = AccountId::new(1001);

        dedup.merge(account, &[closed(1, 10.0)]).await.unwrap();
        let result = dedup
            .merge(account, &[closed(1, 99.0), closed(2, 5.0), closed(2, 6.0)])
            .await
            .unwrap();

        assert_eq!(result.inserted, 1);
        assert_eq!(result.duplicates, 2);
        let stored = store.load_closed_trades(account).await.unwrap();
        assert_eq!(stored[0].profit, 10.0);
        assert_eq!(stored[1].profit, 5.0);
    }

    #[tokio::test]
    async fn test_tickets_are_scoped_per_account() {
        let store = Arc::new(MemoryStore::new());
        let dedup = ClosedTradeDeduplicator::new(store);

        dedup.merge(AccountId::new(1), &batch(&[1])).await.unwrap();
        let other = dedup.merge(AccountId::new(2), &batch(&[1])).await.unwrap();
        assert_eq!(other.inserted, 1);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let dedup = ClosedTradeDeduplicator::new(store);

        let err = dedup.merge(AccountId::new(1), &batch(&[1])).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
