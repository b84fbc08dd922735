//! In-process trade store for tests and embedded use.

use crate::db::store::{AccountRecord, StoreError, TradeStore};
use crate::domain::{AccountId, ClosedTrade, MagicNumber, OpenTrade, Ticket};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    accounts: BTreeMap<AccountId, AccountRecord>,
    open_trades: HashMap<AccountId, Vec<OpenTrade>>,
    closed_trades: HashMap<AccountId, Vec<ClosedTrade>>,
    magic_mappings: HashMap<MagicNumber, String>,
    settings: HashMap<String, String>,
}

/// Store that keeps every table in memory.
///
/// Writes can be switched off with [`MemoryStore::set_fail_writes`] to
/// exercise the store-unavailable path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account row before the cache loads.
    pub fn with_account(mut self, record: AccountRecord) -> Self {
        self.state.get_mut().accounts.insert(record.id, record);
        self
    }

    /// Seed closed history for an account.
    pub fn with_closed_trades(mut self, account: AccountId, trades: Vec<ClosedTrade>) -> Self {
        self.state
            .get_mut()
            .closed_trades
            .entry(account)
            .or_default()
            .extend(trades);
        self
    }

    /// Make every subsequent write fail with `StoreError::Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn upsert_account(&self, record: &AccountRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let registered_at = state
            .accounts
            .get(&record.id)
            .map(|existing| existing.registered_at)
            .unwrap_or(record.registered_at);
        let mut row = record.clone();
        row.registered_at = registered_at;
        state.accounts.insert(record.id, row);
        Ok(())
    }

    async fn load_all_accounts(&self) -> Result<Vec<AccountRecord>, StoreError> {
        Ok(self.state.lock().await.accounts.values().cloned().collect())
    }

    async fn load_open_trades(&self, account: AccountId) -> Result<Vec<OpenTrade>, StoreError> {
        let state = self.state.lock().await;
        let mut trades = state.open_trades.get(&account).cloned().unwrap_or_default();
        trades.sort_by_key(|t| t.ticket);
        Ok(trades)
    }

    async fn replace_open_trades(
        &self,
        account: AccountId,
        trades: &[OpenTrade],
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let stored = trades
            .iter()
            .cloned()
            .map(|mut t| {
                t.sync_status = None;
                t
            })
            .collect();
        self.state.lock().await.open_trades.insert(account, stored);
        Ok(())
    }

    async fn load_closed_trades(
        &self,
        account: AccountId,
    ) -> Result<Vec<ClosedTrade>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.closed_trades.get(&account).cloned().unwrap_or_default())
    }

    async fn bulk_insert_closed_trades(
        &self,
        account: AccountId,
        trades: &[ClosedTrade],
    ) -> Result<usize, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let stored = state.closed_trades.entry(account).or_default();
        let mut seen: HashSet<Ticket> = stored.iter().map(|t| t.ticket).collect();

        let mut inserted = 0;
        for trade in trades {
            if seen.insert(trade.ticket) {
                stored.push(trade.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn existing_tickets_for(
        &self,
        account: AccountId,
    ) -> Result<HashSet<Ticket>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .closed_trades
            .get(&account)
            .map(|trades| trades.iter().map(|t| t.ticket).collect())
            .unwrap_or_default())
    }

    async fn load_magic_mappings(&self) -> Result<HashMap<MagicNumber, String>, StoreError> {
        Ok(self.state.lock().await.magic_mappings.clone())
    }

    async fn save_magic_mapping(&self, magic: MagicNumber, name: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.state
            .lock()
            .await
            .magic_mappings
            .insert(magic, name.to_string());
        Ok(())
    }

    async fn load_settings(&self) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.state.lock().await.settings.clone())
    }

    async fn save_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.state
            .lock()
            .await
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
