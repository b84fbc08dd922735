//! In-memory account state, written through to the trade store.
//!
//! The cache is organized across submodules:
//! - `mod.rs` - Ingestion commands and sync tagging
//! - `queries.rs` - Read-side views for the API

mod queries;

pub use queries::{AccountDetail, AccountStats, AccountStatsRow, AccountSummary, OpenTradeRow};

use crate::db::{AccountRecord, StoreError, TradeStore};
use crate::domain::trade::first_comment;
use crate::domain::{Account, AccountId, AccountType, ClosedTrade, OpenTrade, SyncStatus, Ticket};
use crate::engine::MagicMappings;
use crate::orchestration::dedup::{ClosedTradeDeduplicator, MergeResult};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Account state cache.
///
/// Every mutation builds a new `Account` snapshot and swaps it in under the
/// map's shard lock, so readers see either the old or the new snapshot in
/// full. Store writes happen after the swap; a failed write is returned to
/// the caller while the cache keeps the new state.
///
/// Write-through commands on the same account run one at a time, so the
/// order of snapshots in the cache matches the order of writes in the store.
#[derive(Debug, Clone)]
pub struct AccountCache {
    accounts: Arc<DashMap<AccountId, Arc<Account>>>,
    write_locks: Arc<DashMap<AccountId, Arc<Mutex<()>>>>,
    store: Arc<dyn TradeStore>,
    dedup: ClosedTradeDeduplicator,
}

impl AccountCache {
    pub fn new(store: Arc<dyn TradeStore>) -> Self {
        Self {
            accounts: Arc::new(DashMap::new()),
            write_locks: Arc::new(DashMap::new()),
            dedup: ClosedTradeDeduplicator::new(Arc::clone(&store)),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn TradeStore> {
        &self.store
    }

    /// Populate the cache from the store. Returns the number of accounts.
    ///
    /// # Errors
    /// Returns an error if any read fails.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let records = self.store.load_all_accounts().await?;
        let count = records.len();

        for record in records {
            let id = record.id;
            let open = self.store.load_open_trades(id).await?;
            let closed = self.store.load_closed_trades(id).await?;
            debug!(account_id = %id, open = open.len(), closed = closed.len(), "Loaded account");
            self.accounts
                .insert(id, Arc::new(record.into_account(open, closed)));
        }

        info!(accounts = count, "Account cache loaded from store");
        Ok(count)
    }

    /// Swap in a modified copy of the account. `None` if the id is unknown.
    fn modify<F>(&self, id: AccountId, f: F) -> Option<Arc<Account>>
    where
        F: FnOnce(&mut Account),
    {
        let mut entry = self.accounts.get_mut(&id)?;
        let mut next = Account::clone(&entry);
        f(&mut next);
        let next = Arc::new(next);
        *entry = Arc::clone(&next);
        Some(next)
    }

    /// Hold the account's write lock. The shard guard is released before
    /// awaiting.
    async fn write_lock(&self, id: AccountId) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.write_locks.entry(id).or_default().value());
        lock.lock_owned().await
    }

    async fn persist_account(&self, account: &Account) -> Result<(), StoreError> {
        self.store.upsert_account(&AccountRecord::from(account)).await
    }

    // ===== Ingestion commands =====

    /// Create the account or refresh broker, currency and balance.
    ///
    /// # Errors
    /// Returns an error if the account row cannot be persisted.
    pub async fn register_account(
        &self,
        id: AccountId,
        broker: String,
        currency: String,
        balance: f64,
    ) -> Result<Arc<Account>, StoreError> {
        let _guard = self.write_lock(id).await;
        let now = Utc::now();
        let snapshot = match self.accounts.entry(id) {
            Entry::Occupied(mut occupied) => {
                let mut next = Account::clone(occupied.get());
                next.broker = broker;
                next.currency = currency;
                next.balance = balance;
                next.touch(now);
                let next = Arc::new(next);
                occupied.insert(Arc::clone(&next));
                next
            }
            Entry::Vacant(vacant) => {
                info!(account_id = %id, broker = %broker, "Registering new account");
                let account = Arc::new(Account::new(id, broker, currency, balance, now));
                vacant.insert(Arc::clone(&account));
                account
            }
        };

        self.persist_account(&snapshot).await?;
        Ok(snapshot)
    }

    /// Replace the open-trade snapshot of a known account.
    ///
    /// Returns `false` for an unknown account.
    ///
    /// # Errors
    /// Returns an error if the store rejects the replacement.
    pub async fn update_trades(
        &self,
        id: AccountId,
        trades: Vec<OpenTrade>,
        equity: f64,
        balance: f64,
    ) -> Result<bool, StoreError> {
        if !self.accounts.contains_key(&id) {
            debug!(account_id = %id, "Trade update for unknown account ignored");
            return Ok(false);
        }

        let _guard = self.write_lock(id).await;
        let now = Utc::now();
        let Some(snapshot) = self.modify(id, |account| {
            account.open_trades = Arc::new(trades);
            account.equity = equity;
            account.balance = balance;
            account.touch(now);
        }) else {
            return Ok(false);
        };

        self.store
            .replace_open_trades(id, &snapshot.open_trades)
            .await?;
        self.persist_account(&snapshot).await?;
        Ok(true)
    }

    /// Bump last-seen. Returns `false` for an unknown account.
    pub fn update_heartbeat(&self, id: AccountId) -> bool {
        let now = Utc::now();
        self.modify(id, |account| account.touch(now)).is_some()
    }

    /// Merge a closed-trade batch and reload the account's history from the
    /// store. `None` for an unknown account.
    ///
    /// # Errors
    /// Returns an error if the merge or the reload fails.
    pub async fn update_history(
        &self,
        id: AccountId,
        trades: &[ClosedTrade],
    ) -> Result<Option<MergeResult>, StoreError> {
        if !self.accounts.contains_key(&id) {
            debug!(account_id = %id, "History update for unknown account ignored");
            return Ok(None);
        }

        // merge and reload stay under the lock so an older reload never
        // overwrites a newer one
        let _guard = self.write_lock(id).await;
        let result = self.dedup.merge(id, trades).await?;
        let closed = self.store.load_closed_trades(id).await?;
        let now = Utc::now();
        self.modify(id, |account| {
            account.closed_trades = Arc::new(closed);
            account.touch(now);
        });

        Ok(Some(result))
    }

    /// Set the operator-assigned display name and account type.
    ///
    /// # Errors
    /// Returns an error if the account row cannot be persisted.
    pub async fn update_account_details(
        &self,
        id: AccountId,
        name: Option<String>,
        account_type: Option<AccountType>,
    ) -> Result<bool, StoreError> {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if !self.accounts.contains_key(&id) {
            return Ok(false);
        }

        let _guard = self.write_lock(id).await;
        let Some(snapshot) = self.modify(id, |account| {
            account.name = name;
            account.account_type = account_type;
        }) else {
            return Ok(false);
        };

        info!(account_id = %id, account_type = ?account_type, "Account details updated");
        self.persist_account(&snapshot).await?;
        Ok(true)
    }

    /// Record an error reported by the terminal. Does not count as a sign of
    /// life.
    ///
    /// # Errors
    /// Returns an error if the account row cannot be persisted.
    pub async fn record_client_error(
        &self,
        id: AccountId,
        message: String,
    ) -> Result<bool, StoreError> {
        if !self.accounts.contains_key(&id) {
            return Ok(false);
        }

        let _guard = self.write_lock(id).await;
        let now = Utc::now();
        let Some(snapshot) = self.modify(id, |account| {
            account.last_error = Some(message);
            account.last_error_at = Some(now);
        }) else {
            return Ok(false);
        };

        self.persist_account(&snapshot).await?;
        Ok(true)
    }

    // ===== Sync tagging =====

    /// Tag the account's current open trades by ticket. Trades without an
    /// entry are left untagged. The warning flag is recomputed from the
    /// resulting tags and returned.
    pub fn apply_sync_statuses(
        &self,
        id: AccountId,
        statuses: &HashMap<Ticket, SyncStatus>,
    ) -> bool {
        let mut warning = false;
        self.modify(id, |account| {
            let tagged: Vec<OpenTrade> = account
                .open_trades
                .iter()
                .cloned()
                .map(|mut trade| {
                    trade.sync_status = statuses.get(&trade.ticket).copied();
                    trade
                })
                .collect();
            warning = tagged
                .iter()
                .any(|t| t.sync_status == Some(SyncStatus::Warning));
            account.open_trades = Arc::new(tagged);
            account.sync_warning = warning;
        });
        warning
    }

    /// Drop the warning flag and all trade tags.
    pub fn clear_sync_state(&self, id: AccountId) {
        let needs_clear = self
            .accounts
            .get(&id)
            .map(|a| a.sync_warning || a.open_trades.iter().any(|t| t.sync_status.is_some()))
            .unwrap_or(false);
        if !needs_clear {
            return;
        }

        self.modify(id, |account| {
            account.sync_warning = false;
            account.open_trades = Arc::new(
                account
                    .open_trades
                    .iter()
                    .cloned()
                    .map(|mut t| {
                        t.sync_status = None;
                        t
                    })
                    .collect(),
            );
        });
    }

    // ===== Lookups =====

    pub fn get(&self, id: AccountId) -> Option<Arc<Account>> {
        self.accounts.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: AccountId) -> bool {
        self.accounts.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Point-in-time copy of every account snapshot, ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<Account>> {
        let mut accounts: Vec<Arc<Account>> = self
            .accounts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        accounts.sort_by_key(|a| a.id);
        accounts
    }

    // ===== Magic mappings =====

    /// Make sure every magic seen on any account has a mapping row, then
    /// return all mappings. New rows are named after the first non-empty
    /// open-trade comment, then closed-trade comment, else left empty.
    ///
    /// # Errors
    /// Returns an error if the mappings cannot be read or written.
    pub async fn ensure_magic_mappings(&self) -> Result<MagicMappings, StoreError> {
        let mut mappings = self.store.load_magic_mappings().await?;
        let accounts = self.snapshot();

        let magics: BTreeSet<_> = accounts
            .iter()
            .flat_map(|a| {
                a.open_trades
                    .iter()
                    .map(|t| t.magic_number)
                    .chain(a.closed_trades.iter().map(|t| t.magic_number))
                    .collect::<Vec<_>>()
            })
            .collect();

        for magic in magics {
            if mappings.contains_key(&magic) {
                continue;
            }
            let open_comment = first_comment(accounts.iter().flat_map(|a| {
                a.open_trades
                    .iter()
                    .filter(move |t| t.magic_number == magic)
                    .map(|t| t.comment.as_deref())
            }));
            let name = open_comment
                .or_else(|| {
                    first_comment(accounts.iter().flat_map(|a| {
                        a.closed_trades
                            .iter()
                            .filter(move |t| t.magic_number == magic)
                            .map(|t| t.comment.as_deref())
                    }))
                })
                .unwrap_or_default()
                .to_string();

            self.store.save_magic_mapping(magic, &name).await?;
            info!(magic = %magic, name = %name, "Created magic mapping");
            mappings.insert(magic, name);
        }

        Ok(mappings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::domain::{MagicNumber, Side};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn open(ticket: i64, symbol: &str) -> OpenTrade {
        OpenTrade {
            ticket: Ticket::new(ticket),
            symbol: symbol.to_string(),
            side: Side::Buy,
            volume: 0.1,
            open_price: 1.1,
            open_time: "2026.01.01 10:00:00".to_string(),
            stop_loss: 0.0,
            take_profit: 0.0,
            profit: 1.0,
            swap: 0.0,
            magic_number: MagicNumber::new(77),
            comment: Some("grid".to_string()),
            sync_status: None,
        }
    }

    fn closed(ticket: i64) -> ClosedTrade {
        ClosedTrade {
            ticket: Ticket::new(ticket),
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: 0.1,
            open_price: 1.1,
            close_price: 1.2,
            open_time: None,
            close_time: None,
            stop_loss: None,
            take_profit: None,
            profit: 2.0,
            swap: 0.0,
            commission: 0.0,
            magic_number: MagicNumber::new(5),
            comment: Some("closed five".to_string()),
        }
    }

    async fn cache_with_account() -> (AccountCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let cache = AccountCache::new(store.clone());
        cache
            .register_account(AccountId::new(1001), "Broker".into(), "EUR".into(), 1000.0)
            .await
            .unwrap();
        (cache, store)
    }

    #[tokio::test]
    async fn test_register_creates_then_refreshes() {
        let (cache, store) = cache_with_account().await;
        let first = cache.get(AccountId::new(1001)).unwrap();
        assert_eq!(first.account_type, None);
        assert_eq!(first.drawdown_reference(), 1000.0);

        cache
            .register_account(AccountId::new(1001), "Other".into(), "USD".into(), 1500.0)
            .await
            .unwrap();
        let second = cache.get(AccountId::new(1001)).unwrap();
        assert_eq!(second.broker, "Other");
        assert_eq!(second.balance, 1500.0);
        assert_eq!(second.registered_at, first.registered_at);
        assert!(second.last_seen >= first.last_seen);

        let rows = store.load_all_accounts().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].currency, "USD");
    }

    #[tokio::test]
    async fn test_update_trades_replaces_wholesale() {
        let (cache, store) = cache_with_account().await;
        let id = AccountId::new(1001);

        cache
            .update_trades(id, vec![open(1, "EURUSD"), open(2, "GBPUSD")], 990.0, 1000.0)
            .await
            .unwrap();
        cache
            .update_trades(id, vec![open(3, "USDJPY")], 980.0, 995.0)
            .await
            .unwrap();

        let account = cache.get(id).unwrap();
        assert_eq!(*account.open_trades, vec![open(3, "USDJPY")]);
        assert_eq!(account.equity, 980.0);
        assert_eq!(account.balance, 995.0);
        assert_eq!(store.load_open_trades(id).await.unwrap(), vec![open(3, "USDJPY")]);
    }

    #[tokio::test]
    async fn test_unknown_account_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let cache = AccountCache::new(store.clone());
        let id = AccountId::new(42);

        assert!(!cache.update_trades(id, vec![open(1, "EURUSD")], 0.0, 0.0).await.unwrap());
        assert!(!cache.update_heartbeat(id));
        assert!(cache.update_history(id, &[closed(1)]).await.unwrap().is_none());
        assert!(!cache.record_client_error(id, "x".into()).await.unwrap());
        assert!(cache.get(id).is_none());
        assert!(store.load_closed_trades(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_reloads_from_store() {
        let (cache, _store) = cache_with_account().await;
        let id = AccountId::new(1001);

        let first = cache.update_history(id, &[closed(1), closed(2)]).await.unwrap().unwrap();
        let second = cache.update_history(id, &[closed(2), closed(3)]).await.unwrap().unwrap();

        assert_eq!(first.inserted, 2);
        assert_eq!(second.inserted, 1);
        assert_eq!(cache.get(id).unwrap().closed_trades.len(), 3);
    }

    /// Delays the result of the first closed-trade reload.
    #[derive(Debug)]
    struct SlowFirstReload {
        inner: MemoryStore,
        delayed: AtomicBool,
    }

    #[async_trait]
    impl TradeStore for SlowFirstReload {
        async fn upsert_account(&self, record: &AccountRecord) -> Result<(), StoreError> {
            self.inner.upsert_account(record).await
        }

        async fn load_all_accounts(&self) -> Result<Vec<AccountRecord>, StoreError> {
            self.inner.load_all_accounts().await
        }

        async fn load_open_trades(&self, account: AccountId) -> Result<Vec<OpenTrade>, StoreError> {
            self.inner.load_open_trades(account).await
        }

        async fn replace_open_trades(
            &self,
            account: AccountId,
            trades: &[OpenTrade],
        ) -> Result<(), StoreError> {
            self.inner.replace_open_trades(account, trades).await
        }

        async fn load_closed_trades(
            &self,
            account: AccountId,
        ) -> Result<Vec<ClosedTrade>, StoreError> {
            let trades = self.inner.load_closed_trades(account).await?;
            if !self.delayed.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            Ok(trades)
        }

        async fn bulk_insert_closed_trades(
            &self,
            account: AccountId,
            trades: &[ClosedTrade],
        ) -> Result<usize, StoreError> {
            self.inner.bulk_insert_closed_trades(account, trades).await
        }

        async fn existing_tickets_for(
            &self,
            account: AccountId,
        ) -> Result<HashSet<Ticket>, StoreError> {
            self.inner.existing_tickets_for(account).await
        }

        async fn load_magic_mappings(&self) -> Result<HashMap<MagicNumber, String>, StoreError> {
            self.inner.load_magic_mappings().await
        }

        async fn save_magic_mapping(&self, magic: MagicNumber, name: &str) -> Result<(), StoreError> {
            self.inner.save_magic_mapping(magic, name).await
        }

        async fn load_settings(&self) -> Result<HashMap<String, String>, StoreError> {
            self.inner.load_settings().await
        }

        async fn save_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.save_setting(key, value).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_history_updates_keep_latest_reload() {
        let store = Arc::new(SlowFirstReload {
            inner: MemoryStore::new(),
            delayed: AtomicBool::new(false),
        });
        let cache = AccountCache::new(store.clone());
        let id = AccountId::new(1001);
        cache
            .register_account(id, "Broker".into(), "EUR".into(), 1000.0)
            .await
            .unwrap();

        let first_trades = [closed(1)];
        let first = cache.update_history(id, &first_trades);
        let second = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cache.update_history(id, &[closed(2)]).await
        };
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap().unwrap().inserted, 1);
        assert_eq!(second.unwrap().unwrap().inserted, 1);

        let mut stored: Vec<Ticket> = store
            .load_closed_trades(id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.ticket)
            .collect();
        stored.sort();
        let mut cached: Vec<Ticket> = cache
            .get(id)
            .unwrap()
            .closed_trades
            .iter()
            .map(|t| t.ticket)
            .collect();
        cached.sort();

        assert_eq!(stored, vec![Ticket::new(1), Ticket::new(2)]);
        assert_eq!(cached, stored);
    }

    #[tokio::test]
    async fn test_online_after_each_report() {
        let (cache, _store) = cache_with_account().await;
        let id = AccountId::new(1001);

        let account = cache.get(id).unwrap();
        assert!(account.is_online(60));
        let later = account.last_seen.unwrap() + Duration::seconds(60);
        assert!(!account.is_online_at(later, 60));

        assert!(cache.update_heartbeat(id));
        let after = cache.get(id).unwrap();
        assert!(after.last_seen >= account.last_seen);
        assert!(after.is_online(60));
    }

    #[tokio::test]
    async fn test_store_failure_keeps_cache_state() {
        let (cache, store) = cache_with_account().await;
        let id = AccountId::new(1001);
        store.set_fail_writes(true);

        let err = cache
            .update_trades(id, vec![open(1, "EURUSD")], 900.0, 1000.0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(cache.get(id).unwrap().open_trades.len(), 1);
    }

    #[tokio::test]
    async fn test_details_and_client_error_persist() {
        let (cache, store) = cache_with_account().await;
        let id = AccountId::new(1001);
        let seen = cache.get(id).unwrap().last_seen;

        cache
            .update_account_details(id, Some(" Live ".into()), Some(AccountType::Real))
            .await
            .unwrap();
        cache.record_client_error(id, "OrderSend failed".into()).await.unwrap();

        let account = cache.get(id).unwrap();
        assert!(account.is_real());
        assert_eq!(account.display_name(), "Live");
        assert_eq!(account.last_error.as_deref(), Some("OrderSend failed"));
        assert_eq!(account.last_seen, seen);

        let row = &store.load_all_accounts().await.unwrap()[0];
        assert_eq!(row.account_type, Some(AccountType::Real));
        assert!(row.last_error_at.is_some());
    }

    #[tokio::test]
    async fn test_load_restores_accounts_and_trades() {
        let (cache, store) = cache_with_account().await;
        let id = AccountId::new(1001);
        cache.update_trades(id, vec![open(1, "EURUSD")], 1.0, 1.0).await.unwrap();
        cache.update_history(id, &[closed(9)]).await.unwrap();

        let restored = AccountCache::new(store);
        assert_eq!(restored.load().await.unwrap(), 1);
        let account = restored.get(id).unwrap();
        assert_eq!(account.open_trades.len(), 1);
        assert_eq!(account.closed_trades.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_sync_statuses_by_ticket() {
        let (cache, _store) = cache_with_account().await;
        let id = AccountId::new(1001);
        cache
            .update_trades(id, vec![open(1, "EURUSD"), open(2, "GBPUSD")], 1.0, 1.0)
            .await
            .unwrap();

        let statuses: HashMap<Ticket, SyncStatus> = [
            (Ticket::new(1), SyncStatus::Matched),
            (Ticket::new(2), SyncStatus::Warning),
            (Ticket::new(99), SyncStatus::Warning),
        ]
        .into_iter()
        .collect();
        assert!(cache.apply_sync_statuses(id, &statuses));
        assert!(cache.get(id).unwrap().sync_warning);

        cache.clear_sync_state(id);
        let account = cache.get(id).unwrap();
        assert!(!account.sync_warning);
        assert!(account.open_trades.iter().all(|t| t.sync_status.is_none()));
    }

    #[tokio::test]
    async fn test_ensure_magic_mappings_names_from_comments() {
        let (cache, store) = cache_with_account().await;
        let id = AccountId::new(1001);
        store.save_magic_mapping(MagicNumber::new(77), "Custom").await.unwrap();
        cache.update_trades(id, vec![open(1, "EURUSD")], 1.0, 1.0).await.unwrap();
        cache.update_history(id, &[closed(1)]).await.unwrap();

        let mappings = cache.ensure_magic_mappings().await.unwrap();
        assert_eq!(mappings.get(&MagicNumber::new(77)).map(String::as_str), Some("Custom"));
        assert_eq!(mappings.get(&MagicNumber::new(5)).map(String::as_str), Some("closed five"));
        assert_eq!(store.load_magic_mappings().await.unwrap().len(), 2);
    }
}
