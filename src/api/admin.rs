use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::extract::AppJson;
use super::AppState;
use crate::domain::MagicNumber;
use crate::error::AppError;
use crate::orchestration::{AccountStats, RuntimeSettings, SettingsUpdate, SyncMetrics};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicMappingDto {
    pub magic_number: MagicNumber,
    #[serde(default)]
    pub name: String,
}

pub async fn get_settings(State(state): State<AppState>) -> Json<RuntimeSettings> {
    Json(state.settings.current().await)
}

pub async fn update_settings(
    State(state): State<AppState>,
    AppJson(update): AppJson<SettingsUpdate>,
) -> Result<Json<RuntimeSettings>, AppError> {
    let settings = state.settings.update(update).await?;
    tracing::info!(
        sync_interval_seconds = settings.sync_interval_seconds,
        magic_max_age_days = settings.magic_max_age_days,
        "Runtime settings updated"
    );
    Ok(Json(settings))
}

/// All mappings, after creating rows for magics seen on any account.
pub async fn list_magic_mappings(
    State(state): State<AppState>,
) -> Result<Json<Vec<MagicMappingDto>>, AppError> {
    let mappings = state.cache.ensure_magic_mappings().await?;
    let mut rows: Vec<MagicMappingDto> = mappings
        .into_iter()
        .map(|(magic_number, name)| MagicMappingDto { magic_number, name })
        .collect();
    rows.sort_by_key(|r| r.magic_number);
    Ok(Json(rows))
}

pub async fn save_magic_mapping(
    State(state): State<AppState>,
    AppJson(req): AppJson<MagicMappingDto>,
) -> Result<Json<Value>, AppError> {
    state
        .cache
        .store()
        .save_magic_mapping(req.magic_number, req.name.trim())
        .await?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn stats(State(state): State<AppState>) -> Json<AccountStats> {
    Json(state.cache.account_stats())
}

pub async fn sync_status(State(state): State<AppState>) -> Json<SyncMetrics> {
    Json(state.monitor.metrics().await)
}
