use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::api::{ApiError, AppState};
use crate::models::DriftReport;

#[derive(Debug, Default, Deserialize)]
pub struct LatestQuery {
    /// Only reports whose window spans this many hours
    pub hours: Option<u32>,
    pub model_version: Option<String>,
}

pub async fn latest_drift(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LatestQuery>,
) -> Result<Json<DriftReport>, ApiError> {
    if params.hours == Some(0) {
        return Err(ApiError::bad_request("hours must be positive"));
    }
    let window_secs = params.hours.map(|h| i64::from(h) * 3600);

    let model_version = params.model_version;
    state
        .with_db(move |db| db.latest_report(model_version.as_deref(), window_secs))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No drift report found"))
}
