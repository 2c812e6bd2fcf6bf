use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::{ApiError, AppState};
use crate::models::Alert;

#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub include_resolved: bool,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub count: usize,
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertsQuery>,
) -> Result<Json<AlertsResponse>, ApiError> {
    let include_resolved = params.include_resolved;
    let alerts = state.with_db(move |db| db.list_alerts(include_resolved)).await?;
    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}

pub async fn acknowledge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Alert>, ApiError> {
    let alert = state.with_db(move |db| db.acknowledge_alert(id, Utc::now())).await?;
    info!(alert_id = id, "Alert acknowledged");
    Ok(Json(alert))
}

/// Manual resolution; the next cycle reopens it if the condition persists
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Alert>, ApiError> {
    let alert = state.with_db(move |db| db.resolve_alert(id, Utc::now())).await?;
    info!(alert_id = id, "Alert resolved by operator");
    Ok(Json(alert))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{call, state};
    use crate::models::{fixtures, AlertType, MetricsHistoryPoint};
    use axum::http::StatusCode;
    use chrono::Utc;

    fn seed(state: &crate::api::AppState) -> i64 {
        let now = Utc::now();
        let report = fixtures::empty_report(now, "v1");
        let point = MetricsHistoryPoint::from_report(&report, 2);
        let mut alerts = vec![
            fixtures::open_alert(AlertType::DataDrift, Some("amount"), now),
            fixtures::open_alert(AlertType::ConceptDrift, None, now),
        ];
        state.db.commit_cycle(&report, &point, &mut alerts).unwrap();
        alerts[0].id.unwrap()
    }

    #[tokio::test]
    async fn test_list_and_lifecycle() {
        let state = state();
        let id = seed(&state);

        let (status, body) = call(state.clone(), "GET", "/api/v1/alerts").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);

        let (status, body) = call(state.clone(), "POST", &format!("/api/v1/alerts/{}/acknowledge", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["acknowledged"], true);
        assert_eq!(body["resolved"], false);

        let (status, body) = call(state.clone(), "POST", &format!("/api/v1/alerts/{}/resolve", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resolved"], true);

        let (_, body) = call(state.clone(), "GET", "/api/v1/alerts").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["alerts"][0]["alert_type"], "concept_drift");

        let (_, body) = call(state, "GET", "/api/v1/alerts?include_resolved=true").await;
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_unknown_alert_is_404() {
        let (status, body) = call(state(), "POST", "/api/v1/alerts/42/resolve").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "not found: alert 42");

        let (status, _) = call(state(), "POST", "/api/v1/alerts/42/acknowledge").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
