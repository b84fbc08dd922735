//! Pure computation over account snapshots: sync matching, closed-trade
//! comparison and magic-number aggregation.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

pub mod comparison;
pub mod magic;
pub mod sync_match;

pub use comparison::{
    compare_histories, find_best_match, DemoCandidate, MatchStatus, Period, RealHistory,
    TradeComparison,
};
pub use magic::{
    age_cutoff, magic_curves, magic_drawdowns, resolve_magic_name, sort_drawdowns,
    summarize_magics, MagicCurve, MagicDrawdown, MagicMappings, MagicSummary,
};
pub use sync_match::{DemoTradeIndex, SYNC_MATCH_WINDOW_SECS};

/// Round half away from zero to `dp` decimals in decimal arithmetic.
///
/// Non-finite inputs are returned unchanged.
pub fn round_dp(value: f64, dp: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}
