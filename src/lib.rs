pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::Config;
pub use db::{init_db, MemoryStore, Repository, StoreError, TradeStore};
pub use domain::{
    Account, AccountId, AccountType, ClosedTrade, MagicNumber, OpenTrade, Side, SyncStatus, Ticket,
};
pub use error::AppError;
pub use orchestration::{AccountCache, SyncMonitor};
