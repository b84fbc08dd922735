//! Domain types for terminal accounts and their trades.
//!
//! This module provides:
//! - Identifier newtypes: AccountId, Ticket, MagicNumber
//! - Side, AccountType and SyncStatus enums with their wire names
//! - Open/closed trade records in the terminal JSON shape
//! - The immutable Account snapshot kept by the cache

pub mod account;
pub mod primitives;
pub mod trade;

pub use account::Account;
pub use primitives::{
    format_broker_time, parse_broker_time, AccountId, AccountType, MagicNumber, ParseEnumError,
    Side, SyncStatus, Ticket, BROKER_TIME_FORMAT,
};
pub use trade::{ClosedTrade, OpenTrade};
