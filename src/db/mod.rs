//! Database module for durable account and trade storage.
//!
//! This module provides:
//! - The `TradeStore` boundary the cache and services write through
//! - SQLite initialization, pragmas and schema migration
//! - `Repository`, the SQLite implementation of `TradeStore`
//! - `MemoryStore`, an in-process implementation

pub mod memory;
pub mod migrations;
pub mod repo;
pub mod store;

pub use memory::MemoryStore;
pub use migrations::init_db;
pub use repo::Repository;
pub use store::{AccountRecord, StoreError, TradeStore};
