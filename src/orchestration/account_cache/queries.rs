//! Read-side views over the account cache.

use super::AccountCache;
use crate::domain::{Account, AccountId, AccountType, ClosedTrade, OpenTrade};
use crate::engine::{
    magic_curves, magic_drawdowns, sort_drawdowns, summarize_magics, MagicCurve, MagicDrawdown,
    MagicMappings, MagicSummary,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: AccountId,
    pub name: String,
    pub broker: String,
    pub currency: String,
    pub account_type: Option<AccountType>,
    pub balance: f64,
    pub equity: f64,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub sync_warning: bool,
    pub open_trade_count: usize,
    pub open_profit: f64,
    pub closed_trade_count: usize,
    pub closed_profit: f64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl AccountSummary {
    fn of(account: &Account, now: DateTime<Utc>, timeout_seconds: i64) -> Self {
        Self {
            id: account.id,
            name: account.display_name(),
            broker: account.broker.clone(),
            currency: account.currency.clone(),
            account_type: account.account_type,
            balance: account.balance,
            equity: account.equity,
            online: account.is_online_at(now, timeout_seconds),
            last_seen: account.last_seen,
            registered_at: account.registered_at,
            sync_warning: account.sync_warning,
            open_trade_count: account.open_trades.len(),
            open_profit: account.open_profit(),
            closed_trade_count: account.closed_trades.len(),
            closed_profit: account.closed_profit(),
            last_error: account.last_error.clone(),
            last_error_at: account.last_error_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetail {
    pub account: AccountSummary,
    pub open_trades: Vec<OpenTrade>,
    pub closed_trades: Vec<ClosedTrade>,
    pub magics: Vec<MagicSummary>,
    pub curves: Vec<MagicCurve>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTradeRow {
    pub account_id: AccountId,
    pub account_name: String,
    pub account_type: Option<AccountType>,
    pub is_real: bool,
    #[serde(flatten)]
    pub trade: OpenTrade,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatsRow {
    pub account_id: AccountId,
    pub account_name: String,
    pub open_trade_count: usize,
    pub closed_trade_count: usize,
    /// `-` when the account has no dated closed trades.
    pub first_close_time: String,
    pub last_close_time: String,
    pub closed_profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStats {
    pub accounts: Vec<AccountStatsRow>,
    pub total_open_trades: usize,
    pub total_closed_trades: usize,
    pub total_closed_profit: f64,
}

impl AccountCache {
    /// All accounts, online first, then by id.
    pub fn account_summaries(&self, now: DateTime<Utc>, timeout_seconds: i64) -> Vec<AccountSummary> {
        let mut summaries: Vec<AccountSummary> = self
            .snapshot()
            .iter()
            .map(|a| AccountSummary::of(a, now, timeout_seconds))
            .collect();
        summaries.sort_by(|a, b| b.online.cmp(&a.online).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// One account with its magic aggregates and curves.
    pub fn account_detail(
        &self,
        id: AccountId,
        mappings: &MagicMappings,
        cutoff: Option<&str>,
        now: DateTime<Utc>,
        timeout_seconds: i64,
    ) -> Option<AccountDetail> {
        let account = self.get(id)?;
        Some(AccountDetail {
            account: AccountSummary::of(&account, now, timeout_seconds),
            open_trades: account.open_trades.to_vec(),
            closed_trades: account.closed_trades.to_vec(),
            magics: summarize_magics(&account, mappings, cutoff),
            curves: magic_curves(&account, mappings, cutoff),
        })
    }

    /// Every open trade across accounts, real first, then account name, then
    /// ticket.
    pub fn open_trade_rows(&self) -> Vec<OpenTradeRow> {
        let mut rows: Vec<OpenTradeRow> = self
            .snapshot()
            .iter()
            .flat_map(|account| {
                let name = account.display_name();
                account
                    .open_trades
                    .iter()
                    .map(|trade| OpenTradeRow {
                        account_id: account.id,
                        account_name: name.clone(),
                        account_type: account.account_type,
                        is_real: account.is_real(),
                        trade: trade.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        rows.sort_by(|a, b| {
            b.is_real
                .cmp(&a.is_real)
                .then_with(|| a.account_name.cmp(&b.account_name))
                .then_with(|| a.trade.ticket.cmp(&b.trade.ticket))
        });
        rows
    }

    pub fn drawdowns(&self, mappings: &MagicMappings) -> Vec<MagicDrawdown> {
        let mut items: Vec<MagicDrawdown> = self
            .snapshot()
            .iter()
            .flat_map(|account| magic_drawdowns(account, mappings))
            .collect();
        sort_drawdowns(&mut items);
        items
    }

    pub fn account_stats(&self) -> AccountStats {
        let rows: Vec<AccountStatsRow> = self.snapshot().iter().map(stats_row).collect();

        AccountStats {
            total_open_trades: rows.iter().map(|r| r.open_trade_count).sum(),
            total_closed_trades: rows.iter().map(|r| r.closed_trade_count).sum(),
            total_closed_profit: rows.iter().map(|r| r.closed_profit).sum(),
            accounts: rows,
        }
    }
}

fn stats_row(account: &Arc<Account>) -> AccountStatsRow {
    let close_times = || {
        account
            .closed_trades
            .iter()
            .filter_map(|t| t.close_time.as_deref())
            .filter(|c| !c.trim().is_empty())
    };

    AccountStatsRow {
        account_id: account.id,
        account_name: account.display_name(),
        open_trade_count: account.open_trades.len(),
        closed_trade_count: account.closed_trades.len(),
        first_close_time: close_times().min().unwrap_or("-").to_string(),
        last_close_time: close_times().max().unwrap_or("-").to_string(),
        closed_profit: account.closed_profit(),
    }
}
