//! Pairing live closed trades with demo closed trades and measuring execution
//! delay and slippage.

use crate::domain::{AccountId, ClosedTrade, Side};
use crate::engine::round_dp;
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// Preferred open-time window, in seconds, for a demo counterpart.
pub const COMPARISON_WINDOW_SECS: i64 = 120;

/// Stop-loss tolerance for the fallback match.
pub const STOP_LOSS_TOLERANCE: f64 = 1e-5;

const SLIPPAGE_DECIMALS: u32 = 5;

/// Reporting period applied to the live trade's close time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Period {
    Today,
    ThisWeek,
    ThisMonth,
    #[default]
    All,
}

impl Period {
    /// Start of the period containing `now`, or `None` for [`Period::All`].
    pub fn start(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let today = now.date();
        let day = match self {
            Period::Today => today,
            Period::ThisWeek => {
                today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
            }
            Period::ThisMonth => today.with_day(1)?,
            Period::All => return None,
        };
        Some(day.and_time(NaiveTime::MIN))
    }
}

impl FromStr for Period {
    type Err = std::convert::Infallible;

    /// Unknown or empty values select [`Period::All`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "today" => Period::Today,
            "this-week" => Period::ThisWeek,
            "this-month" => Period::ThisMonth,
            _ => Period::All,
        })
    }
}

/// A demo closed trade together with the account that produced it.
#[derive(Debug, Clone)]
pub struct DemoCandidate {
    pub account_id: AccountId,
    pub account_name: String,
    pub trade: ClosedTrade,
}

/// Live account history to compare.
#[derive(Debug, Clone)]
pub struct RealHistory {
    pub account_id: AccountId,
    pub account_name: String,
    pub trades: Vec<ClosedTrade>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    #[serde(rename = "MATCHED")]
    Matched,
    #[serde(rename = "NOT FOUND")]
    NotFound,
}

/// One live closed trade and its demo counterpart, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeComparison {
    pub real_account_id: AccountId,
    pub real_account_name: String,
    pub real_trade: ClosedTrade,
    pub status: MatchStatus,
    pub demo_account_id: Option<AccountId>,
    pub demo_account_name: Option<String>,
    pub demo_trade: Option<ClosedTrade>,
    /// Live minus demo, in seconds. Positive means the live execution lagged.
    pub open_delay_seconds: Option<i64>,
    pub close_delay_seconds: Option<i64>,
    /// Positive means a worse price on the live account.
    pub open_slippage: Option<f64>,
    pub close_slippage: Option<f64>,
    pub open_slippage_formatted: Option<String>,
    pub close_slippage_formatted: Option<String>,
}

/// Pick the demo counterpart for a live closed trade.
///
/// Candidates must share symbol and side. The candidate inside the time
/// window with the smallest open-time distance wins. Only when nothing is
/// inside the window does the first candidate with an equal positive
/// stop-loss qualify.
pub fn find_best_match<'a>(
    real: &ClosedTrade,
    candidates: &'a [DemoCandidate],
) -> Option<&'a DemoCandidate> {
    let real_open = real.opened_at()?;

    let mut best_in_window: Option<(i64, &DemoCandidate)> = None;
    let mut stop_loss_match: Option<&DemoCandidate> = None;

    for candidate in candidates {
        let demo = &candidate.trade;
        if demo.symbol != real.symbol || demo.side != real.side {
            continue;
        }
        let Some(demo_open) = demo.opened_at() else {
            continue;
        };

        let diff = (real_open - demo_open).num_seconds().abs();
        if diff <= COMPARISON_WINDOW_SECS {
            if best_in_window.map(|(d, _)| diff < d).unwrap_or(true) {
                best_in_window = Some((diff, candidate));
            }
        } else if stop_loss_match.is_none() && stop_losses_match(real, demo) {
            stop_loss_match = Some(candidate);
        }
    }

    best_in_window.map(|(_, c)| c).or(stop_loss_match)
}

fn stop_losses_match(real: &ClosedTrade, demo: &ClosedTrade) -> bool {
    match (real.stop_loss, demo.stop_loss) {
        (Some(r), Some(d)) if r > 0.0 && d != 0.0 => (r - d).abs() < STOP_LOSS_TOLERANCE,
        _ => false,
    }
}

/// Round to five decimals and collapse sub-tolerance noise to exactly zero.
pub fn normalize_slippage(value: f64) -> f64 {
    let rounded = round_dp(value, SLIPPAGE_DECIMALS);
    if rounded.abs() < STOP_LOSS_TOLERANCE {
        0.0
    } else {
        rounded
    }
}

pub fn format_slippage(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else {
        format!("{:.5}", value)
    }
}

/// Signed slippage for the pair: (open, close).
pub fn slippage(real: &ClosedTrade, demo: &ClosedTrade) -> (f64, f64) {
    let open_diff = real.open_price - demo.open_price;
    let close_diff = real.close_price - demo.close_price;
    let (open, close) = match real.side {
        Side::Buy => (open_diff, -close_diff),
        Side::Sell => (-open_diff, close_diff),
    };
    (normalize_slippage(open), normalize_slippage(close))
}

fn delay_seconds(real: Option<NaiveDateTime>, demo: Option<NaiveDateTime>) -> Option<i64> {
    Some((real? - demo?).num_seconds())
}

fn compare_one(
    history: &RealHistory,
    real: &ClosedTrade,
    candidates: &[DemoCandidate],
) -> TradeComparison {
    let mut result = TradeComparison {
        real_account_id: history.account_id,
        real_account_name: history.account_name.clone(),
        real_trade: real.clone(),
        status: MatchStatus::NotFound,
        demo_account_id: None,
        demo_account_name: None,
        demo_trade: None,
        open_delay_seconds: None,
        close_delay_seconds: None,
        open_slippage: None,
        close_slippage: None,
        open_slippage_formatted: None,
        close_slippage_formatted: None,
    };

    if let Some(matched) = find_best_match(real, candidates) {
        let demo = &matched.trade;
        let (open_slip, close_slip) = slippage(real, demo);

        result.status = MatchStatus::Matched;
        result.demo_account_id = Some(matched.account_id);
        result.demo_account_name = Some(matched.account_name.clone());
        result.open_delay_seconds = delay_seconds(real.opened_at(), demo.opened_at());
        result.close_delay_seconds = delay_seconds(real.closed_at(), demo.closed_at());
        result.open_slippage = Some(open_slip);
        result.close_slippage = Some(close_slip);
        result.open_slippage_formatted = Some(format_slippage(open_slip));
        result.close_slippage_formatted = Some(format_slippage(close_slip));
        result.demo_trade = Some(demo.clone());
    }

    result
}

/// Compare every live closed trade inside the period against the demo pool.
///
/// Live trades without a parsable close time are never filtered out. The
/// result is ordered newest close time first; unparsable close times last.
pub fn compare_histories(
    real_accounts: &[RealHistory],
    demo_pool: &[DemoCandidate],
    period_start: Option<NaiveDateTime>,
) -> Vec<TradeComparison> {
    let mut results: Vec<TradeComparison> = real_accounts
        .iter()
        .flat_map(|history| {
            history
                .trades
                .iter()
                .filter(move |trade| match (period_start, trade.closed_at()) {
                    (Some(start), Some(closed)) => closed >= start,
                    _ => true,
                })
                .map(move |trade| compare_one(history, trade, demo_pool))
        })
        .collect();

    results.sort_by(|a, b| newest_close_first(a.real_trade.closed_at(), b.real_trade.closed_at()));
    results
}

fn newest_close_first(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
