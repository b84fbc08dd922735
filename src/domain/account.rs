//! Account snapshot held by the account cache.

use crate::domain::{AccountId, AccountType, ClosedTrade, OpenTrade};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Immutable view of one terminal account.
///
/// The cache replaces the whole snapshot on every mutation; trade lists sit
/// behind `Arc` so a replacement that leaves them untouched does not copy them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
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
    pub sync_warning: bool,
    pub open_trades: Arc<Vec<OpenTrade>>,
    pub closed_trades: Arc<Vec<ClosedTrade>>,
}

impl Account {
    /// A freshly registered account, seen at `now`.
    pub fn new(
        id: AccountId,
        broker: String,
        currency: String,
        balance: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            broker,
            currency,
            balance,
            equity: balance,
            name: None,
            account_type: None,
            registered_at: now,
            last_seen: Some(now),
            last_error: None,
            last_error_at: None,
            sync_warning: false,
            open_trades: Arc::new(Vec::new()),
            closed_trades: Arc::new(Vec::new()),
        }
    }

    /// True iff `now - last_seen < timeout_seconds`.
    pub fn is_online_at(&self, now: DateTime<Utc>, timeout_seconds: i64) -> bool {
        match self.last_seen {
            Some(seen) => now - seen < Duration::seconds(timeout_seconds),
            None => false,
        }
    }

    pub fn is_online(&self, timeout_seconds: i64) -> bool {
        self.is_online_at(Utc::now(), timeout_seconds)
    }

    /// Move last-seen forward. Wall-clock last-write-wins: an older
    /// timestamp never rewinds it.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_seen = Some(match self.last_seen {
            Some(seen) if seen > at => seen,
            _ => at,
        });
    }

    pub fn is_real(&self) -> bool {
        self.account_type == Some(AccountType::Real)
    }

    pub fn is_demo(&self) -> bool {
        self.account_type == Some(AccountType::Demo)
    }

    /// Operator-assigned name, or the account number.
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.id.to_string(),
        }
    }

    /// Sum of floating profit over open trades.
    pub fn open_profit(&self) -> f64 {
        self.open_trades.iter().map(|t| t.profit).sum()
    }

    /// Sum of realized profit over the closed history.
    pub fn closed_profit(&self) -> f64 {
        self.closed_trades.iter().map(|t| t.profit).sum()
    }

    /// Reference balance for drawdown figures. The historical peak is not
    /// reconstructed; deposits and withdrawals make it unreliable.
    pub fn drawdown_reference(&self) -> f64 {
        self.balance
    }
}
