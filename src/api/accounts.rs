use axum::extract::{Path, State};
use axum::Json;
use chrono::{Local, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::extract::AppJson;
use super::AppState;
use crate::domain::{AccountId, AccountType};
use crate::engine::{age_cutoff, MagicDrawdown, MagicMappings};
use crate::error::AppError;
use crate::orchestration::{AccountDetail, AccountSummary, OpenTradeRow};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetailsRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// `REAL`, `DEMO`, or empty to clear.
    #[serde(default, rename = "type", alias = "accountType")]
    pub account_type: Option<String>,
}

/// Operator names for magic numbers. Read paths render without names rather
/// than failing when the mappings cannot be loaded.
pub(super) async fn load_mappings(state: &AppState) -> MagicMappings {
    match state.cache.store().load_magic_mappings().await {
        Ok(mappings) => mappings,
        Err(e) => {
            warn!(error = %e, "Failed to load magic mappings");
            MagicMappings::new()
        }
    }
}

pub async fn list_accounts(State(state): State<AppState>) -> Json<Vec<AccountSummary>> {
    Json(
        state
            .cache
            .account_summaries(Utc::now(), state.config.account_timeout_seconds),
    )
}

pub async fn get_account(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<AccountDetail>, AppError> {
    let id = AccountId::new(id);
    let mappings = load_mappings(&state).await;
    let settings = state.settings.current().await;
    let cutoff = age_cutoff(Local::now().naive_local(), settings.magic_max_age_days);

    state
        .cache
        .account_detail(
            id,
            &mappings,
            cutoff.as_deref(),
            Utc::now(),
            state.config.account_timeout_seconds,
        )
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("account {}", id)))
}

pub async fn update_details(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    AppJson(req): AppJson<AccountDetailsRequest>,
) -> Result<Json<Value>, AppError> {
    let account_type = match req.account_type.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<AccountType>()
                .map_err(|e| AppError::BadRequest(e.to_string()))?,
        ),
    };

    let id = AccountId::new(id);
    let known = state
        .cache
        .update_account_details(id, req.name, account_type)
        .await?;
    if !known {
        return Err(AppError::NotFound(format!("account {}", id)));
    }
    Ok(Json(json!({"status": "ok"})))
}

pub async fn open_trades(State(state): State<AppState>) -> Json<Vec<OpenTradeRow>> {
    Json(state.cache.open_trade_rows())
}

pub async fn drawdowns(State(state): State<AppState>) -> Json<Vec<MagicDrawdown>> {
    let mappings = load_mappings(&state).await;
    Json(state.cache.drawdowns(&mappings))
}
