//! Matching live open trades against the demo fleet's open trades.

use crate::domain::{OpenTrade, Side, SyncStatus};
use chrono::NaiveDateTime;
use std::collections::HashMap;

/// Maximum open-time distance, in seconds, for a demo trade to confirm a
/// live trade.
pub const SYNC_MATCH_WINDOW_SECS: i64 = 60;

/// Index of demo open trades keyed by exact symbol and side.
///
/// Demo trades whose open time does not parse are left out: they can never
/// match.
#[derive(Debug, Default)]
pub struct DemoTradeIndex {
    by_key: HashMap<(String, Side), Vec<NaiveDateTime>>,
    len: usize,
}

impl DemoTradeIndex {
    pub fn new<'a, I>(demo_trades: I) -> Self
    where
        I: IntoIterator<Item = &'a OpenTrade>,
    {
        let mut index = Self::default();
        for trade in demo_trades {
            if let Some(opened) = trade.opened_at() {
                index
                    .by_key
                    .entry((trade.symbol.clone(), trade.side))
                    .or_default()
                    .push(opened);
                index.len += 1;
            }
        }
        index
    }

    /// Number of indexed demo trades.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True iff some demo trade has the same symbol, the same side and an open
    /// time within [`SYNC_MATCH_WINDOW_SECS`] of the live trade.
    pub fn has_match(&self, real: &OpenTrade) -> bool {
        let Some(opened) = real.opened_at() else {
            return false;
        };
        let Some(candidates) = self.by_key.get(&(real.symbol.clone(), real.side)) else {
            return false;
        };

        candidates
            .iter()
            .any(|demo| (opened - *demo).num_seconds().abs() <= SYNC_MATCH_WINDOW_SECS)
    }

    pub fn classify(&self, real: &OpenTrade) -> SyncStatus {
        if self.has_match(real) {
            SyncStatus::Matched
        } else {
            SyncStatus::Warning
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MagicNumber, Ticket};

    fn trade(ticket: i64, symbol: &str, side: Side, open_time: &str) -> OpenTrade {
        OpenTrade {
            ticket: Ticket::new(ticket),
            symbol: symbol.to_string(),
            side,
            volume: 0.1,
            open_price: 1.1,
            open_time: open_time.to_string(),
            stop_loss: 0.0,
            take_profit: 0.0,
            profit: 0.0,
            swap: 0.0,
            magic_number: MagicNumber::new(77),
            comment: None,
            sync_status: None,
        }
    }

    #[test]
    fn matches_within_window_both_directions() {
        let demo = vec![trade(9, "EURUSD", Side::Buy, "2026.01.01 10:00:59")];
        let index = DemoTradeIndex::new(&demo);

        assert!(index.has_match(&trade(5, "EURUSD", Side::Buy, "2026.01.01 10:00:00")));
        assert!(index.has_match(&trade(5, "EURUSD", Side::Buy, "2026.01.01 10:01:58")));
        assert!(index.has_match(&trade(5, "EURUSD", Side::Buy, "2026.01.01 09:59:59")));
    }

    #[test]
    fn rejects_outside_window() {
        let demo = vec![trade(9, "EURUSD", Side::Buy, "2026.01.01 10:01:01")];
        let index = DemoTradeIndex::new(&demo);

        assert_eq!(
            index.classify(&trade(5, "EURUSD", Side::Buy, "2026.01.01 10:00:00")),
            SyncStatus::Warning
        );
    }

    #[test]
    fn requires_exact_symbol_and_side() {
        let demo = vec![
            trade(9, "eurusd", Side::Buy, "2026.01.01 10:00:00"),
            trade(10, "EURUSD", Side::Sell, "2026.01.01 10:00:00"),
        ];
        let index = DemoTradeIndex::new(&demo);

        assert!(!index.has_match(&trade(5, "EURUSD", Side::Buy, "2026.01.01 10:00:00")));
    }

    #[test]
    fn unparsable_times_never_match() {
        let demo = vec![
            trade(9, "EURUSD", Side::Buy, "garbage"),
            trade(10, "EURUSD", Side::Buy, "2026.01.01 10:00:00"),
        ];
        let index = DemoTradeIndex::new(&demo);
        assert_eq!(index.len(), 1);

        assert!(!index.has_match(&trade(5, "EURUSD", Side::Buy, "")));
        assert!(index.has_match(&trade(6, "EURUSD", Side::Buy, "2026.01.01 10:00:30")));
    }

    #[test]
    fn shared_demo_trade_confirms_several_live_trades() {
        let demo = vec![trade(9, "EURUSD", Side::Buy, "2026.01.01 10:00:00")];
        let index = DemoTradeIndex::new(&demo);

        assert!(index.has_match(&trade(5, "EURUSD", Side::Buy, "2026.01.01 10:00:10")));
        assert!(index.has_match(&trade(6, "EURUSD", Side::Buy, "2026.01.01 10:00:20")));
    }
}
