use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{ApiError, AppState};
use crate::models::MetricsHistoryPoint;

#[derive(Debug, Default, Deserialize)]
pub struct TimeseriesQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub interval: Option<String>,
}

/// Metrics points averaged over one interval
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsBucket {
    pub timestamp: DateTime<Utc>,
    pub samples: usize,
    pub predictions_count: usize,
    pub labels_received: usize,
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub auc_roc: Option<f64>,
    pub avg_psi: Option<f64>,
    pub max_psi: Option<f64>,
    pub ks_statistic: Option<f64>,
    pub alert_count: usize,
}

#[derive(Debug, Serialize)]
pub struct TimeseriesResponse {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: String,
    pub count: usize,
    pub points: Vec<MetricsBucket>,
}

pub async fn timeseries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TimeseriesQuery>,
) -> Result<Json<TimeseriesResponse>, ApiError> {
    let interval = params.interval.unwrap_or_else(|| "1h".to_string());
    let step = parse_interval(&interval)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid interval '{}', expected e.g. 30s, 15m, 1h, 1d", interval)))?;

    let end = params.end.unwrap_or_else(Utc::now);
    let start = params.start.unwrap_or(end - Duration::hours(24));
    if start >= end {
        return Err(ApiError::bad_request("start must be before end"));
    }

    let points = state.with_db(move |db| db.metrics_range(start, end)).await?;
    let buckets = bucket_points(&points, step);

    Ok(Json(TimeseriesResponse {
        start,
        end,
        interval,
        count: buckets.len(),
        points: buckets,
    }))
}

/// Parse `<n><unit>` with unit one of s, m, h, d
pub fn parse_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    let unit = s.chars().last()?;
    let n: i64 = s[..s.len() - unit.len_utf8()].parse().ok()?;
    if n <= 0 {
        return None;
    }
    match unit {
        's' => Some(Duration::seconds(n)),
        'm' => Some(Duration::minutes(n)),
        'h' => Some(Duration::hours(n)),
        'd' => Some(Duration::days(n)),
        _ => None,
    }
}

/// Group points into epoch-aligned buckets of width `step`
pub fn bucket_points(points: &[MetricsHistoryPoint], step: Duration) -> Vec<MetricsBucket> {
    let width = step.num_seconds().max(1);
    let mut groups: BTreeMap<i64, Vec<&MetricsHistoryPoint>> = BTreeMap::new();
    for point in points {
        let key = point.timestamp.timestamp().div_euclid(width) * width;
        groups.entry(key).or_default().push(point);
    }

    groups
        .into_iter()
        .filter_map(|(key, group)| {
            let timestamp = DateTime::from_timestamp(key, 0)?;
            let n = group.len();
            let mean_usize = |f: fn(&MetricsHistoryPoint) -> usize| {
                let sum: usize = group.iter().map(|p| f(p)).sum();
                (sum as f64 / n as f64).round() as usize
            };

            Some(MetricsBucket {
                timestamp,
                samples: n,
                predictions_count: mean_usize(|p| p.predictions_count),
                labels_received: mean_usize(|p| p.labels_received),
                accuracy: mean_of(group.iter().map(|p| p.accuracy)),
                precision: mean_of(group.iter().map(|p| p.precision)),
                recall: mean_of(group.iter().map(|p| p.recall)),
                f1_score: mean_of(group.iter().map(|p| p.f1_score)),
                auc_roc: mean_of(group.iter().map(|p| p.auc_roc)),
                avg_psi: mean_of(group.iter().map(|p| p.avg_psi)),
                max_psi: group.iter().filter_map(|p| p.max_psi).reduce(f64::max),
                ks_statistic: mean_of(group.iter().map(|p| p.ks_statistic)),
                alert_count: group.iter().map(|p| p.alert_count).max().unwrap_or(0),
            })
        })
        .collect()
}

/// Mean over the present values; None when all are missing
fn mean_of(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, n) = values.flatten().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{call, state};
    use crate::models::fixtures;
    use axum::http::StatusCode;

    fn point(secs: i64, accuracy: Option<f64>, max_psi: Option<f64>, alerts: usize) -> MetricsHistoryPoint {
        MetricsHistoryPoint {
            id: None,
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
            model_version: "v1".to_string(),
            predictions_count: 10,
            labels_received: 0,
            accuracy,
            precision: None,
            recall: None,
            f1_score: None,
            auc_roc: None,
            avg_psi: max_psi,
            max_psi,
            ks_statistic: None,
            alert_count: alerts,
        }
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("30s"), Some(Duration::seconds(30)));
        assert_eq!(parse_interval("15m"), Some(Duration::minutes(15)));
        assert_eq!(parse_interval("1h"), Some(Duration::hours(1)));
        assert_eq!(parse_interval("1d"), Some(Duration::days(1)));
        assert_eq!(parse_interval("0h"), None);
        assert_eq!(parse_interval("h"), None);
        assert_eq!(parse_interval("5w"), None);
        assert_eq!(parse_interval(""), None);
    }

    #[test]
    fn test_bucket_points() {
        let base = 1_700_000_000 - 1_700_000_000 % 3600;
        let points = vec![
            point(base + 10, Some(0.9), Some(0.05), 0),
            point(base + 1800, None, Some(0.3), 2),
            point(base + 1900, Some(0.7), None, 1),
            point(base + 3600, Some(0.8), Some(0.1), 0),
        ];

        let buckets = bucket_points(&points, Duration::hours(1));
        assert_eq!(buckets.len(), 2);

        let first = &buckets[0];
        assert_eq!(first.timestamp.timestamp(), base);
        assert_eq!(first.samples, 3);
        assert!((first.accuracy.unwrap() - 0.8).abs() < 1e-12);
        assert_eq!(first.max_psi, Some(0.3));
        assert_eq!(first.alert_count, 2);
        assert_eq!(first.predictions_count, 10);

        assert_eq!(buckets[1].samples, 1);
        assert_eq!(buckets[1].accuracy, Some(0.8));
    }

    #[tokio::test]
    async fn test_timeseries_endpoint() {
        let state = state();
        let now = Utc::now();
        let report = fixtures::empty_report(now - Duration::minutes(5), "v1");
        let point = MetricsHistoryPoint::from_report(&report, 1);
        state.db.commit_cycle(&report, &point, &mut []).unwrap();

        let (status, body) = call(state.clone(), "GET", "/api/v1/monitoring/metrics/timeseries?interval=15m").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["interval"], "15m");
        assert_eq!(body["count"], 1);
        assert_eq!(body["points"][0]["alert_count"], 1);

        let (status, body) = call(state, "GET", "/api/v1/monitoring/metrics/timeseries?interval=fortnight").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("fortnight"));
    }
}
