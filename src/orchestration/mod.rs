//! Stateful services that sit between the HTTP adapter and the store.
//!
//! This module provides:
//! - `AccountCache`, the in-memory account map with write-through persistence
//! - Closed-trade deduplication by ticket
//! - The periodic sync monitor and its alert queue
//! - Trade comparison over persisted history
//! - Runtime settings backed by the store

pub mod account_cache;
pub mod alerts;
pub mod comparison;
pub mod dedup;
pub mod settings;
pub mod sync_monitor;

pub use account_cache::{
    AccountCache, AccountDetail, AccountStats, AccountStatsRow, AccountSummary, OpenTradeRow,
};
pub use alerts::{
    spawn_alert_worker, Alert, AlertChannel, AlertDispatcher, AlertError, AlertKind,
    MailRelayChannel, WebhookChannel,
};
pub use comparison::ComparisonService;
pub use dedup::{ClosedTradeDeduplicator, MergeResult};
pub use settings::{RuntimeSettings, SettingsService, SettingsUpdate};
pub use sync_monitor::{spawn_sync_loop, SyncHealth, SyncMetrics, SyncMonitor, SyncReport};
