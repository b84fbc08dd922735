//! Durable store boundary used by the account cache, deduplicator and
//! comparison service.

use crate::domain::{
    Account, AccountId, AccountType, ClosedTrade, MagicNumber, OpenTrade, Ticket,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Persisted account row. Trade lists are stored separately.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub id: AccountId,
    pub broker: String,
    pub currency: String,
    pub balance: f64,
    pub equity: f64,
    pub name: Option<String>,
    pub account_type: Option<AccountType>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl From<&Account> for AccountRecord {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            broker: account.broker.clone(),
            currency: account.currency.clone(),
            balance: account.balance,
            equity: account.equity,
            name: account.name.clone(),
            account_type: account.account_type,
            registered_at: account.registered_at,
            last_seen: account.last_seen,
            last_error: account.last_error.clone(),
            last_error_at: account.last_error_at,
        }
    }
}

impl AccountRecord {
    /// Rebuild an account snapshot around loaded trade lists.
    pub fn into_account(self, open: Vec<OpenTrade>, closed: Vec<ClosedTrade>) -> Account {
        Account {
            id: self.id,
            broker: self.broker,
            currency: self.currency,
            balance: self.balance,
            equity: self.equity,
            name: self.name,
            account_type: self.account_type,
            registered_at: self.registered_at,
            last_seen: self.last_seen,
            last_error: self.last_error,
            last_error_at: self.last_error_at,
            sync_warning: false,
            open_trades: std::sync::Arc::new(open),
            closed_trades: std::sync::Arc::new(closed),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed durable storage for accounts, open trades and closed trades, plus
/// the small key/value tables the service keeps next to them.
#[async_trait]
pub trait TradeStore: Send + Sync + std::fmt::Debug {
    /// Insert or overwrite the account row.
    async fn upsert_account(&self, record: &AccountRecord) -> Result<(), StoreError>;

    async fn load_all_accounts(&self) -> Result<Vec<AccountRecord>, StoreError>;

    async fn load_open_trades(&self, account: AccountId) -> Result<Vec<OpenTrade>, StoreError>;

    /// Delete every open trade of the account, then insert `trades`.
    async fn replace_open_trades(
        &self,
        account: AccountId,
        trades: &[OpenTrade],
    ) -> Result<(), StoreError>;

    async fn load_closed_trades(&self, account: AccountId)
        -> Result<Vec<ClosedTrade>, StoreError>;

    /// Insert closed trades; rows whose (account, ticket) already exists are
    /// left untouched. Returns the number of rows actually inserted.
    async fn bulk_insert_closed_trades(
        &self,
        account: AccountId,
        trades: &[ClosedTrade],
    ) -> Result<usize, StoreError>;

    async fn existing_tickets_for(&self, account: AccountId)
        -> Result<HashSet<Ticket>, StoreError>;

    async fn load_magic_mappings(&self) -> Result<HashMap<MagicNumber, String>, StoreError>;

    async fn save_magic_mapping(&self, magic: MagicNumber, name: &str) -> Result<(), StoreError>;

    async fn load_settings(&self) -> Result<HashMap<String, String>, StoreError>;

    async fn save_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
