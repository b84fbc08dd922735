//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `mod.rs` - Account rows, magic mappings and runtime settings
//! - `trades.rs` - Open-trade replacement and closed-trade history

mod trades;

use crate::db::store::{AccountRecord, StoreError, TradeStore};
use crate::domain::{AccountId, AccountType, ClosedTrade, MagicNumber, OpenTrade, Ticket};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    // =========================================================================
    // Account operations
    // =========================================================================

    /// Insert the account row or overwrite every column of an existing one.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub async fn upsert_account_row(&self, record: &AccountRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                account_id, broker, currency, balance, equity, name, account_type,
                registered_at, last_seen, last_error, last_error_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                broker = excluded.broker,
                currency = excluded.currency,
                balance = excluded.balance,
                equity = excluded.equity,
                name = excluded.name,
                account_type = excluded.account_type,
                last_seen = excluded.last_seen,
                last_error = excluded.last_error,
                last_error_at = excluded.last_error_at
            "#,
        )
        .bind(record.id.as_i64())
        .bind(&record.broker)
        .bind(&record.currency)
        .bind(record.balance)
        .bind(record.equity)
        .bind(record.name.as_deref())
        .bind(record.account_type.map(|t| t.as_str()))
        .bind(record.registered_at.to_rfc3339())
        .bind(record.last_seen.map(|t| t.to_rfc3339()))
        .bind(record.last_error.as_deref())
        .bind(record.last_error_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load every persisted account row, ordered by account id.
    pub async fn query_accounts(&self) -> Result<Vec<AccountRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, broker, currency, balance, equity, name, account_type,
                   registered_at, last_seen, last_error, last_error_at
            FROM accounts
            ORDER BY account_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .iter()
            .map(|row| {
                let id = AccountId::new(row.get("account_id"));
                let type_str: Option<String> = row.get("account_type");
                let account_type = type_str.and_then(|s| {
                    s.parse::<AccountType>()
                        .map_err(|e| {
                            warn!(account_id = %id, error = %e, "Ignoring unknown account type");
                        })
                        .ok()
                });
                let registered_str: String = row.get("registered_at");

                AccountRecord {
                    id,
                    broker: row.get("broker"),
                    currency: row.get("currency"),
                    balance: row.get("balance"),
                    equity: row.get("equity"),
                    name: row.get("name"),
                    account_type,
                    registered_at: parse_timestamp(&registered_str).unwrap_or_else(|| {
                        warn!(account_id = %id, value = %registered_str, "Failed to parse registered_at, using now");
                        Utc::now()
                    }),
                    last_seen: row
                        .get::<Option<String>, _>("last_seen")
                        .as_deref()
                        .and_then(parse_timestamp),
                    last_error: row.get("last_error"),
                    last_error_at: row
                        .get::<Option<String>, _>("last_error_at")
                        .as_deref()
                        .and_then(parse_timestamp),
                }
            })
            .collect();

        Ok(records)
    }

    // =========================================================================
    // Magic mapping operations
    // =========================================================================

    pub async fn query_magic_mappings(&self) -> Result<HashMap<MagicNumber, String>, sqlx::Error> {
        let rows = sqlx::query("SELECT magic_number, name FROM magic_mappings")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| (MagicNumber::new(row.get("magic_number")), row.get("name")))
            .collect())
    }

    pub async fn upsert_magic_mapping(
        &self,
        magic: MagicNumber,
        name: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO magic_mappings (magic_number, name) VALUES (?, ?)
            ON CONFLICT(magic_number) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(magic.as_i64())
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Runtime settings
    // =========================================================================

    pub async fn query_settings(&self) -> Result<HashMap<String, String>, sqlx::Error> {
        let rows = sqlx::query("SELECT conf_key, conf_value FROM global_config")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("conf_key"), row.get("conf_value")))
            .collect())
    }

    pub async fn upsert_setting(&self, key: &str, value: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO global_config (conf_key, conf_value) VALUES (?, ?)
            ON CONFLICT(conf_key) DO UPDATE SET conf_value = excluded.conf_value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

#[async_trait]
impl TradeStore for Repository {
    async fn upsert_account(&self, record: &AccountRecord) -> Result<(), StoreError> {
        Ok(self.upsert_account_row(record).await?)
    }

    async fn load_all_accounts(&self) -> Result<Vec<AccountRecord>, StoreError> {
        Ok(self.query_accounts().await?)
    }

    async fn load_open_trades(&self, account: AccountId) -> Result<Vec<OpenTrade>, StoreError> {
        Ok(self.query_open_trades(account).await?)
    }

    async fn replace_open_trades(
        &self,
        account: AccountId,
        trades: &[OpenTrade],
    ) -> Result<(), StoreError> {
        Ok(self.replace_open_trades_atomic(account, trades).await?)
    }

    async fn load_closed_trades(
        &self,
        account: AccountId,
    ) -> Result<Vec<ClosedTrade>, StoreError> {
        Ok(self.query_closed_trades(account).await?)
    }

    async fn bulk_insert_closed_trades(
        &self,
        account: AccountId,
        trades: &[ClosedTrade],
    ) -> Result<usize, StoreError> {
        Ok(self.insert_closed_trades_batch(account, trades).await?)
    }

    async fn existing_tickets_for(
        &self,
        account: AccountId,
    ) -> Result<HashSet<Ticket>, StoreError> {
        Ok(self.query_closed_tickets(account).await?)
    }

    async fn load_magic_mappings(&self) -> Result<HashMap<MagicNumber, String>, StoreError> {
        Ok(self.query_magic_mappings().await?)
    }

    async fn save_magic_mapping(&self, magic: MagicNumber, name: &str) -> Result<(), StoreError> {
        Ok(self.upsert_magic_mapping(magic, name).await?)
    }

    async fn load_settings(&self) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.query_settings().await?)
    }

    async fn save_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        Ok(self.upsert_setting(key, value).await?)
    }
}
