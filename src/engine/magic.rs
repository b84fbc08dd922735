//! Per-strategy (magic number) profit, visibility, curves and drawdown.

use crate::domain::trade::first_comment;
use crate::domain::{
    format_broker_time, Account, AccountId, AccountType, ClosedTrade, MagicNumber, OpenTrade,
};
use crate::engine::round_dp;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Operator-assigned magic names.
pub type MagicMappings = HashMap<MagicNumber, String>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicSummary {
    pub magic_number: MagicNumber,
    pub name: String,
    pub open_profit: f64,
    pub closed_profit: f64,
    pub total_profit: f64,
    pub open_trade_count: usize,
    pub closed_trade_count: usize,
}

/// Running closed profit of one magic, ordered by close time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicCurve {
    pub magic_number: MagicNumber,
    pub name: String,
    pub labels: Vec<String>,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicDrawdown {
    pub account_id: AccountId,
    pub account_name: String,
    pub account_type: Option<AccountType>,
    pub is_real: bool,
    pub magic_number: MagicNumber,
    pub magic_name: String,
    pub drawdown: f64,
    pub drawdown_percent: f64,
    pub balance_high: f64,
    pub magic_equity: f64,
}

/// Close-time cutoff for `max_age_days`, in broker text form.
///
/// `None` when filtering is disabled (`max_age_days <= 0`).
pub fn age_cutoff(now: NaiveDateTime, max_age_days: i64) -> Option<String> {
    if max_age_days <= 0 {
        return None;
    }
    Some(format_broker_time(&(now - Duration::days(max_age_days))))
}

/// Every magic present in either trade set, ascending.
pub fn magics_of(account: &Account) -> BTreeSet<MagicNumber> {
    account
        .open_trades
        .iter()
        .map(|t| t.magic_number)
        .chain(account.closed_trades.iter().map(|t| t.magic_number))
        .collect()
}

/// Mapping, then first open-trade comment, then first closed-trade comment,
/// then the number itself.
pub fn resolve_magic_name(
    magic: MagicNumber,
    mappings: &MagicMappings,
    open: &[OpenTrade],
    closed: &[ClosedTrade],
) -> String {
    if let Some(name) = mappings.get(&magic).map(|n| n.trim()).filter(|n| !n.is_empty()) {
        return name.to_string();
    }

    let open_comment = first_comment(
        open.iter()
            .filter(|t| t.magic_number == magic)
            .map(|t| t.comment.as_deref()),
    );
    let closed_comment = || {
        first_comment(
            closed
                .iter()
                .filter(|t| t.magic_number == magic)
                .map(|t| t.comment.as_deref()),
        )
    };

    open_comment
        .or_else(closed_comment)
        .map(str::to_string)
        .unwrap_or_else(|| magic.to_string())
}

/// A magic with any open trade is always visible. Otherwise it is hidden once
/// its latest close time sorts before the cutoff. Fixed-width broker times
/// order correctly as text.
pub fn is_magic_visible(
    magic: MagicNumber,
    open: &[OpenTrade],
    closed: &[ClosedTrade],
    cutoff: Option<&str>,
) -> bool {
    let Some(cutoff) = cutoff else {
        return true;
    };
    if open.iter().any(|t| t.magic_number == magic) {
        return true;
    }

    let latest_close = closed
        .iter()
        .filter(|t| t.magic_number == magic)
        .filter_map(|t| t.close_time.as_deref())
        .filter(|c| !c.trim().is_empty())
        .max();

    match latest_close {
        Some(latest) => latest >= cutoff,
        None => true,
    }
}

/// Per-magic totals for the visible magics of one account, ascending by magic.
pub fn summarize_magics(
    account: &Account,
    mappings: &MagicMappings,
    cutoff: Option<&str>,
) -> Vec<MagicSummary> {
    let open = account.open_trades.as_slice();
    let closed = account.closed_trades.as_slice();

    magics_of(account)
        .into_iter()
        .filter(|magic| is_magic_visible(*magic, open, closed, cutoff))
        .map(|magic| {
            let (open_count, open_profit) = open
                .iter()
                .filter(|t| t.magic_number == magic)
                .fold((0usize, 0.0), |(n, p), t| (n + 1, p + t.profit));
            let (closed_count, closed_profit) = closed
                .iter()
                .filter(|t| t.magic_number == magic)
                .fold((0usize, 0.0), |(n, p), t| (n + 1, p + t.profit));

            MagicSummary {
                magic_number: magic,
                name: resolve_magic_name(magic, mappings, open, closed),
                open_profit,
                closed_profit,
                total_profit: open_profit + closed_profit,
                open_trade_count: open_count,
                closed_trade_count: closed_count,
            }
        })
        .collect()
}

/// Cumulative closed-profit curve per visible magic with closed history.
///
/// Trades without a close time sort last; points are rounded to cents.
pub fn magic_curves(
    account: &Account,
    mappings: &MagicMappings,
    cutoff: Option<&str>,
) -> Vec<MagicCurve> {
    let open = account.open_trades.as_slice();
    let closed = account.closed_trades.as_slice();

    let closed_magics: BTreeSet<MagicNumber> = closed.iter().map(|t| t.magic_number).collect();

    closed_magics
        .into_iter()
        .filter(|magic| is_magic_visible(*magic, open, closed, cutoff))
        .map(|magic| {
            let mut trades: Vec<&ClosedTrade> =
                closed.iter().filter(|t| t.magic_number == magic).collect();
            trades.sort_by(|a, b| close_time_order(a.close_time.as_deref(), b.close_time.as_deref()));

            let mut cumulative = 0.0;
            let mut labels = Vec::with_capacity(trades.len());
            let mut data = Vec::with_capacity(trades.len());
            for trade in trades {
                cumulative += trade.profit;
                labels.push(trade.close_time.clone().unwrap_or_default());
                data.push(round_dp(cumulative, 2));
            }

            MagicCurve {
                magic_number: magic,
                name: resolve_magic_name(magic, mappings, open, closed),
                labels,
                data,
            }
        })
        .collect()
}

fn close_time_order(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Drawdown of every magic with open exposure on one account.
///
/// The reference balance is the account's current balance.
pub fn magic_drawdowns(account: &Account, mappings: &MagicMappings) -> Vec<MagicDrawdown> {
    let open = account.open_trades.as_slice();
    let closed = account.closed_trades.as_slice();
    let reference = account.drawdown_reference();

    let open_magics: BTreeSet<MagicNumber> = open.iter().map(|t| t.magic_number).collect();

    open_magics
        .into_iter()
        .map(|magic| {
            let open_profit: f64 = open
                .iter()
                .filter(|t| t.magic_number == magic)
                .map(|t| t.profit)
                .sum();
            let drawdown = (-open_profit).max(0.0);
            let drawdown_percent = if reference > 0.0 {
                drawdown / reference * 100.0
            } else {
                0.0
            };

            MagicDrawdown {
                account_id: account.id,
                account_name: account.display_name(),
                account_type: account.account_type,
                is_real: account.is_real(),
                magic_number: magic,
                magic_name: resolve_magic_name(magic, mappings, open, closed),
                drawdown,
                drawdown_percent,
                balance_high: reference,
                magic_equity: reference + open_profit,
            }
        })
        .collect()
}

/// Real first, then deepest drawdown percent, then account name, then magic.
pub fn sort_drawdowns(items: &mut [MagicDrawdown]) {
    items.sort_by(|a, b| {
        b.is_real
            .cmp(&a.is_real)
            .then_with(|| b.drawdown_percent.total_cmp(&a.drawdown_percent))
            .then_with(|| a.account_name.cmp(&b.account_name))
            .then_with(|| a.magic_number.cmp(&b.magic_number))
    });
}
