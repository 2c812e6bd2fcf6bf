use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::{ApiError, AppState};
use crate::error::DriftError;
use crate::models::{HealthStatus, MonitorStatus};

/// Missed cycles tolerated before the report counts as stale
const STALE_AFTER_INTERVALS: i64 = 3;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_model_version: Option<String>,
    pub last_report_at: Option<DateTime<Utc>>,
    pub last_report_status: Option<HealthStatus>,
    pub seconds_since_last_report: Option<i64>,
    pub stale: bool,
    pub interval_secs: u64,
    pub subscribers: usize,
    pub scheduler: MonitorStatus,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let now = Utc::now();
    let interval_secs = state.config.monitor.interval_secs;

    // Reports survive restarts, the in-memory scheduler status does not
    let (active_model_version, last_report) = state
        .with_db(|db| {
            let active = match db.active_model_version() {
                Ok(model) => Some(model.version),
                Err(DriftError::NotFound(_)) => None,
                Err(e) => return Err(e),
            };
            Ok((active, db.latest_report(None, None)?))
        })
        .await?;
    let last_report_at = last_report.as_ref().map(|r| r.report_timestamp);
    let seconds_since_last_report = last_report_at.map(|at| (now - at).num_seconds().max(0));
    let stale = match seconds_since_last_report {
        Some(age) => age > STALE_AFTER_INTERVALS * interval_secs as i64,
        None => true,
    };

    Ok(Json(HealthResponse {
        status: if stale { "stale" } else { "ok" },
        active_model_version,
        last_report_at,
        last_report_status: last_report.map(|r| r.overall_status),
        seconds_since_last_report,
        stale,
        interval_secs,
        subscribers: state.monitor.publisher().receiver_count(),
        scheduler: state.monitor.status(),
    }))
}
