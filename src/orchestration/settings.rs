//! Runtime-mutable settings persisted as key/value rows.
//!
//! Values are read from the store on every access so that changes apply on
//! the next reconciliation tick without a restart.

use crate::db::{StoreError, TradeStore};
use crate::domain::MagicNumber;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

pub const KEY_SYNC_INTERVAL: &str = "SYNC_INTERVAL_SECONDS";
pub const KEY_MAGIC_MAX_AGE: &str = "MAGIC_NUMBER_MAX_AGE_DAYS";
pub const KEY_ALERT_EMAIL: &str = "ALERT_EMAIL_ON_SYNC";
pub const KEY_ALERT_WEBHOOK: &str = "ALERT_WEBHOOK_ON_SYNC";
pub const KEY_SYNC_EXEMPT: &str = "SYNC_EXEMPT_MAGIC_NUMBERS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    /// `<= 0` disables the reconciliation loop.
    pub sync_interval_seconds: i64,
    /// `<= 0` disables the magic-number age filter.
    pub magic_max_age_days: i64,
    pub alert_email_on_sync: bool,
    pub alert_webhook_on_sync: bool,
    pub sync_exempt_magics: BTreeSet<MagicNumber>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            sync_interval_seconds: 60,
            magic_max_age_days: 30,
            alert_email_on_sync: true,
            alert_webhook_on_sync: true,
            sync_exempt_magics: BTreeSet::new(),
        }
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub sync_interval_seconds: Option<i64>,
    pub magic_max_age_days: Option<i64>,
    pub alert_email_on_sync: Option<bool>,
    pub alert_webhook_on_sync: Option<bool>,
    pub sync_exempt_magics: Option<BTreeSet<MagicNumber>>,
}

#[derive(Debug, Clone)]
pub struct SettingsService {
    store: Arc<dyn TradeStore>,
    defaults: RuntimeSettings,
}

impl SettingsService {
    pub fn new(store: Arc<dyn TradeStore>, defaults: RuntimeSettings) -> Self {
        Self { store, defaults }
    }

    /// Current settings. A failed read falls back to the defaults.
    pub async fn current(&self) -> RuntimeSettings {
        match self.store.load_settings().await {
            Ok(rows) => self.from_rows(&rows),
            Err(e) => {
                warn!(error = %e, "Failed to load settings, using defaults");
                self.defaults.clone()
            }
        }
    }

    /// # Errors
    /// Returns an error if a changed value cannot be persisted.
    pub async fn update(&self, update: SettingsUpdate) -> Result<RuntimeSettings, StoreError> {
        if let Some(v) = update.sync_interval_seconds {
            self.store.save_setting(KEY_SYNC_INTERVAL, &v.to_string()).await?;
        }
        if let Some(v) = update.magic_max_age_days {
            self.store.save_setting(KEY_MAGIC_MAX_AGE, &v.to_string()).await?;
        }
        if let Some(v) = update.alert_email_on_sync {
            self.store.save_setting(KEY_ALERT_EMAIL, &v.to_string()).await?;
        }
        if let Some(v) = update.alert_webhook_on_sync {
            self.store.save_setting(KEY_ALERT_WEBHOOK, &v.to_string()).await?;
        }
        if let Some(magics) = update.sync_exempt_magics {
            self.store
                .save_setting(KEY_SYNC_EXEMPT, &format_magic_list(&magics))
                .await?;
        }
        Ok(self.current().await)
    }

    fn from_rows(&self, rows: &HashMap<String, String>) -> RuntimeSettings {
        let d = &self.defaults;
        RuntimeSettings {
            sync_interval_seconds: parse_or(rows, KEY_SYNC_INTERVAL, d.sync_interval_seconds),
            magic_max_age_days: parse_or(rows, KEY_MAGIC_MAX_AGE, d.magic_max_age_days),
            alert_email_on_sync: parse_or(rows, KEY_ALERT_EMAIL, d.alert_email_on_sync),
            alert_webhook_on_sync: parse_or(rows, KEY_ALERT_WEBHOOK, d.alert_webhook_on_sync),
            sync_exempt_magics: rows
                .get(KEY_SYNC_EXEMPT)
                .map(|raw| parse_magic_list(raw))
                .unwrap_or_else(|| d.sync_exempt_magics.clone()),
        }
    }
}

fn parse_or<T: std::str::FromStr + Copy>(rows: &HashMap<String, String>, key: &str, default: T) -> T {
    match rows.get(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Invalid setting value, using default");
            default
        }),
        None => default,
    }
}

/// Parse a comma or whitespace separated list, skipping invalid entries.
pub fn parse_magic_list(raw: &str) -> BTreeSet<MagicNumber> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<i64>() {
            Ok(n) => Some(MagicNumber::new(n)),
            Err(_) => {
                warn!(value = %s, "Ignoring invalid magic number");
                None
            }
        })
        .collect()
}

fn format_magic_list(magics: &BTreeSet<MagicNumber>) -> String {
    magics
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
