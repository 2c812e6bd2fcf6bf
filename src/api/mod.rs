//! HTTP and WebSocket surface
//!
//! Read-only views over persisted reports, metrics and alerts, operator
//! acknowledge/resolve actions, scheduler liveness, and the live report
//! stream.

pub mod handlers;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::database::Database;
use crate::error::DriftError;
use crate::monitor::Monitor;

/// Shared handler state
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub monitor: Monitor,
}

impl AppState {
    pub fn new(config: Arc<Config>, db: Database, monitor: Monitor) -> Self {
        Self { config, db, monitor }
    }

    /// Run store calls on the blocking pool; SQLite access never runs on a
    /// runtime worker
    pub async fn with_db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> crate::error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| ApiError::internal(format!("store task failed: {}", e)))?
            .map_err(ApiError::from)
    }
}

/// Error body returned by every handler
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<DriftError> for ApiError {
    fn from(err: DriftError) -> Self {
        let status = match &err {
            DriftError::NotFound(_) => StatusCode::NOT_FOUND,
            DriftError::InsufficientData { .. } | DriftError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
            DriftError::StorageUnavailable(_) | DriftError::Codec(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "detail": self.detail }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Monitoring
        .route("/api/v1/monitoring/drift/latest", get(handlers::reports::latest_drift))
        .route("/api/v1/monitoring/metrics/timeseries", get(handlers::metrics::timeseries))
        .route("/api/v1/monitoring/health", get(handlers::health::health))
        // Alerts
        .route("/api/v1/alerts", get(handlers::alerts::list_alerts))
        .route("/api/v1/alerts/{id}/acknowledge", post(handlers::alerts::acknowledge))
        .route("/api/v1/alerts/{id}/resolve", post(handlers::alerts::resolve))
        // Live report stream
        .route("/ws/reports", get(handlers::websocket::ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` completes
pub async fn serve<F>(state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let bind = state.config.api.bind.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Monitoring API listening on {}", bind);

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::publisher::ReportPublisher;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    pub fn state() -> Arc<AppState> {
        let config = Arc::new(Config::default());
        let db = Database::open_memory().unwrap();
        let monitor = Monitor::new(config.clone(), db.clone(), ReportPublisher::new(8));
        Arc::new(AppState::new(config, db, monitor))
    }

    /// Send one request through the router, returning status and JSON body
    pub async fn call(state: Arc<AppState>, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state)
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let err: ApiError = DriftError::NotFound("alert 3".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: ApiError = DriftError::InvalidConfiguration("bad".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_store_calls_run_off_the_runtime() {
        let state = state();
        // The test runtime drives everything on this thread
        let runtime_thread = std::thread::current().id();
        let store_thread = state
            .with_db(|_| Ok(std::thread::current().id()))
            .await
            .unwrap();
        assert_ne!(store_thread, runtime_thread);

        let err = state
            .with_db(|db| db.get_alert(7))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (status, _) = call(state(), "GET", "/api/v1/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
