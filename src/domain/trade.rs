//! Open and closed trade records as reported by the terminals.

use crate::domain::{parse_broker_time, MagicNumber, Side, SyncStatus, Ticket};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A currently open position on one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTrade {
    pub ticket: Ticket,
    pub symbol: String,
    #[serde(rename = "type")]
    pub side: Side,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub open_price: f64,
    /// Broker-local open time (`yyyy.MM.dd HH:mm:ss`).
    #[serde(default)]
    pub open_time: String,
    #[serde(default)]
    pub stop_loss: f64,
    #[serde(default)]
    pub take_profit: f64,
    /// Floating profit.
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub swap: f64,
    #[serde(default)]
    pub magic_number: MagicNumber,
    #[serde(default)]
    pub comment: Option<String>,
    /// Transient reconciliation tag, never read from the wire.
    #[serde(default, skip_deserializing)]
    pub sync_status: Option<SyncStatus>,
}

impl OpenTrade {
    pub fn opened_at(&self) -> Option<NaiveDateTime> {
        parse_broker_time(&self.open_time)
    }
}

/// A closed trade from the account history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTrade {
    pub ticket: Ticket,
    pub symbol: String,
    #[serde(rename = "type")]
    pub side: Side,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub open_price: f64,
    #[serde(default)]
    pub close_price: f64,
    #[serde(default)]
    pub open_time: Option<String>,
    #[serde(default)]
    pub close_time: Option<String>,
    #[serde(default, alias = "sl")]
    pub stop_loss: Option<f64>,
    #[serde(default, alias = "tp")]
    pub take_profit: Option<f64>,
    /// Realized profit.
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub swap: f64,
    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub magic_number: MagicNumber,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ClosedTrade {
    pub fn opened_at(&self) -> Option<NaiveDateTime> {
        self.open_time.as_deref().and_then(parse_broker_time)
    }

    pub fn closed_at(&self) -> Option<NaiveDateTime> {
        self.close_time.as_deref().and_then(parse_broker_time)
    }
}

/// First non-empty comment in the given sequence.
pub(crate) fn first_comment<'a, I>(comments: I) -> Option<&'a str>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    comments
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|c| !c.is_empty())
}
