//! Report endpoints called by the trading terminals.
//!
//! Every report is scoped to one account id. Reports for an account that has
//! not registered yet succeed with `"known": false` and change nothing.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::extract::AppJson;
use super::AppState;
use crate::domain::{AccountId, ClosedTrade, OpenTrade};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub account_id: AccountId,
    #[serde(default)]
    pub broker: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub balance: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeUpdateRequest {
    pub account_id: AccountId,
    #[serde(default)]
    pub trades: Vec<OpenTrade>,
    #[serde(default)]
    pub equity: f64,
    #[serde(default)]
    pub balance: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeInitRequest {
    pub account_id: AccountId,
    #[serde(default)]
    pub trades: Vec<OpenTrade>,
    #[serde(default)]
    pub closed_trades: Vec<ClosedTrade>,
    #[serde(default)]
    pub equity: f64,
    #[serde(default)]
    pub balance: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryUpdateRequest {
    pub account_id: AccountId,
    #[serde(default)]
    pub closed_trades: Vec<ClosedTrade>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub account_id: AccountId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientErrorRequest {
    pub account_id: AccountId,
    #[serde(alias = "error")]
    pub message: String,
}

fn unknown_account() -> Json<Value> {
    Json(json!({"status": "ok", "known": false}))
}

pub async fn register(
    State(state): State<AppState>,
    AppJson(req): AppJson<RegisterRequest>,
) -> Result<Json<Value>, AppError> {
    state
        .cache
        .register_account(req.account_id, req.broker, req.currency, req.balance)
        .await?;

    Ok(Json(json!({
        "status": "ok",
        "known": true,
        "message": "Account registered",
    })))
}

pub async fn update_trades(
    State(state): State<AppState>,
    AppJson(req): AppJson<TradeUpdateRequest>,
) -> Result<Json<Value>, AppError> {
    let received = req.trades.len();
    let known = state
        .cache
        .update_trades(req.account_id, req.trades, req.equity, req.balance)
        .await?;
    if !known {
        return Ok(unknown_account());
    }

    Ok(Json(json!({
        "status": "ok",
        "known": true,
        "tradesReceived": received,
    })))
}

/// Full snapshot sent on (re)connect: open trades plus closed history.
pub async fn init_trades(
    State(state): State<AppState>,
    AppJson(req): AppJson<TradeInitRequest>,
) -> Result<Json<Value>, AppError> {
    let open_received = req.trades.len();
    let known = state
        .cache
        .update_trades(req.account_id, req.trades, req.equity, req.balance)
        .await?;
    if !known {
        return Ok(unknown_account());
    }

    let Some(merged) = state
        .cache
        .update_history(req.account_id, &req.closed_trades)
        .await?
    else {
        return Ok(unknown_account());
    };

    Ok(Json(json!({
        "status": "ok",
        "known": true,
        "openTradesReceived": open_received,
        "closedTradesReceived": merged.received,
        "newTradesInserted": merged.inserted,
    })))
}

pub async fn update_history(
    State(state): State<AppState>,
    AppJson(req): AppJson<HistoryUpdateRequest>,
) -> Result<Json<Value>, AppError> {
    let Some(merged) = state
        .cache
        .update_history(req.account_id, &req.closed_trades)
        .await?
    else {
        return Ok(unknown_account());
    };

    Ok(Json(json!({
        "status": "ok",
        "known": true,
        "historyReceived": merged.received,
        "newTradesInserted": merged.inserted,
    })))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    AppJson(req): AppJson<HeartbeatRequest>,
) -> Json<Value> {
    if !state.cache.update_heartbeat(req.account_id) {
        return unknown_account();
    }
    Json(json!({"status": "ok", "known": true}))
}

pub async fn client_error(
    State(state): State<AppState>,
    AppJson(req): AppJson<ClientErrorRequest>,
) -> Result<Json<Value>, AppError> {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return Err(AppError::BadRequest("message must not be empty".to_string()));
    }

    tracing::warn!(account_id = %req.account_id, error = %message, "Terminal reported an error");
    let known = state
        .cache
        .record_client_error(req.account_id, message)
        .await?;
    if !known {
        return Ok(unknown_account());
    }
    Ok(Json(json!({"status": "ok", "known": true})))
}
