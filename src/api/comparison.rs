use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use super::extract::AppQuery;
use super::AppState;
use crate::domain::AccountId;
use crate::engine::{Period, TradeComparison};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonQuery {
    pub account_id: Option<i64>,
    pub period: Option<String>,
}

pub async fn get_comparison(
    AppQuery(params): AppQuery<ComparisonQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<TradeComparison>>, AppError> {
    let period = params
        .period
        .as_deref()
        .map(|p| p.parse::<Period>().unwrap_or_default())
        .unwrap_or_default();
    let account = params.account_id.map(AccountId::new);

    let results = state.comparison.compare(account, period).await?;
    Ok(Json(results))
}
