use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::error::{DriftError, Result};
use crate::models::{
    Alert, BaselineSummary, DriftReport, FeatureSummary, GroundTruthRecord, MetricsHistoryPoint,
    ModelVersion, PredictionRecord, PruneStats, StatisticsKind,
};

/// SQLite caps bound parameters per statement; id lookups are chunked below it
const ID_CHUNK: usize = 500;

/// Thread-safe database wrapper
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database: {}", path.as_ref().display()))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Registered model versions
            CREATE TABLE IF NOT EXISTS model_registry (
                version TEXT PRIMARY KEY,
                registered_at TEXT NOT NULL,
                training_samples INTEGER NOT NULL,
                training_metrics TEXT NOT NULL,
                baseline_positive_rate REAL NOT NULL,
                active INTEGER NOT NULL DEFAULT 0
            );

            -- Predictions written by the serving path
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id TEXT NOT NULL UNIQUE,
                model_version TEXT NOT NULL,
                features TEXT NOT NULL,
                predicted_label INTEGER NOT NULL,
                predicted_probability REAL NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_predictions_timestamp ON predictions(timestamp);
            CREATE INDEX IF NOT EXISTS idx_predictions_version ON predictions(model_version, timestamp);

            -- Late-arriving labels, possibly several per transaction
            CREATE TABLE IF NOT EXISTS ground_truth (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id TEXT NOT NULL,
                actual_label INTEGER NOT NULL,
                label_source TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ground_truth_tx ON ground_truth(transaction_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_ground_truth_created ON ground_truth(created_at);

            -- Baselines and per-cycle current snapshots
            CREATE TABLE IF NOT EXISTS feature_statistics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feature_name TEXT NOT NULL,
                model_version TEXT NOT NULL,
                kind TEXT NOT NULL,
                summary TEXT NOT NULL,
                reference TEXT,
                report_id INTEGER,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_feature_statistics_baseline
                ON feature_statistics(feature_name, model_version) WHERE kind = 'baseline';
            CREATE INDEX IF NOT EXISTS idx_feature_statistics_created ON feature_statistics(created_at);

            -- One row per completed cycle
            CREATE TABLE IF NOT EXISTS drift_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_timestamp TEXT NOT NULL,
                model_version TEXT NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                window_secs INTEGER NOT NULL,
                total_predictions INTEGER NOT NULL,
                data_drift_detected INTEGER NOT NULL,
                concept_drift_detected INTEGER NOT NULL,
                performance_degraded INTEGER NOT NULL,
                overall_status TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_drift_reports_timestamp ON drift_reports(report_timestamp);

            -- Alert lifecycle; at most one unresolved row per key
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                feature_name TEXT,
                metric_value REAL NOT NULL,
                threshold REAL NOT NULL,
                recommendation TEXT NOT NULL,
                triggered_at TEXT NOT NULL,
                acknowledged INTEGER NOT NULL DEFAULT 0,
                acknowledged_at TEXT,
                resolved INTEGER NOT NULL DEFAULT 0,
                resolved_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_unresolved
                ON alerts(alert_type, COALESCE(feature_name, '')) WHERE resolved = 0;
            CREATE INDEX IF NOT EXISTS idx_alerts_triggered ON alerts(triggered_at);

            -- Per-cycle time series
            CREATE TABLE IF NOT EXISTS metrics_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                model_version TEXT NOT NULL,
                predictions_count INTEGER NOT NULL,
                labels_received INTEGER NOT NULL,
                accuracy REAL,
                precision_score REAL,
                recall REAL,
                f1_score REAL,
                auc_roc REAL,
                avg_psi REAL,
                max_psi REAL,
                ks_statistic REAL,
                alert_count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_metrics_history_timestamp ON metrics_history(timestamp);
            "#,
        )?;

        Ok(())
    }

    // ==================== Model Registry Operations ====================

    /// Register a model version with its baselines and make it the active one.
    ///
    /// A version is registered exactly once.
    pub fn register_model(&self, model: &ModelVersion, baselines: &[BaselineSummary]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT version FROM model_registry WHERE version = ?",
                [&model.version],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(DriftError::InvalidConfiguration(format!(
                "model version {} is already registered",
                model.version
            )));
        }

        tx.execute("UPDATE model_registry SET active = 0", [])?;
        tx.execute(
            "INSERT INTO model_registry (version, registered_at, training_samples, training_metrics, baseline_positive_rate, active)
             VALUES (?, ?, ?, ?, ?, 1)",
            params![
                model.version,
                ts(&model.registered_at),
                model.training_samples as i64,
                serde_json::to_string(&model.training_metrics)?,
                model.baseline_positive_rate,
            ],
        )?;

        for baseline in baselines {
            tx.execute(
                "INSERT INTO feature_statistics (feature_name, model_version, kind, summary, reference, report_id, created_at)
                 VALUES (?, ?, ?, ?, ?, NULL, ?)",
                params![
                    baseline.feature_name,
                    model.version,
                    StatisticsKind::Baseline.to_string(),
                    serde_json::to_string(&baseline.summary)?,
                    serde_json::to_string(&baseline.reference)?,
                    ts(&baseline.created_at),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Training-time record of one model version
    pub fn model_version(&self, version: &str) -> Result<ModelVersion> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT version, registered_at, training_samples, training_metrics, baseline_positive_rate, active
             FROM model_registry WHERE version = ?",
            [version],
            model_from_row,
        )
        .optional()?
        .ok_or_else(|| DriftError::NotFound(format!("model version {}", version)))
    }

    /// The most recently registered model version
    pub fn active_model_version(&self) -> Result<ModelVersion> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT version, registered_at, training_samples, training_metrics, baseline_positive_rate, active
             FROM model_registry WHERE active = 1 ORDER BY registered_at DESC LIMIT 1",
            [],
            model_from_row,
        )
        .optional()?
        .ok_or_else(|| DriftError::NotFound("no active model version".to_string()))
    }

    // ==================== Baseline Operations ====================

    /// Frozen baseline for one feature of one model version
    pub fn baseline(&self, feature: &str, model_version: &str) -> Result<BaselineSummary> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT feature_name, model_version, summary, reference, created_at
             FROM feature_statistics WHERE kind = 'baseline' AND feature_name = ? AND model_version = ?",
            [feature, model_version],
            baseline_from_row,
        )
        .optional()?
        .ok_or_else(|| {
            DriftError::NotFound(format!("baseline for {} under model version {}", feature, model_version))
        })
    }

    /// Every baseline stored for a model version, ordered by feature name
    pub fn baselines(&self, model_version: &str) -> Result<Vec<BaselineSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT feature_name, model_version, summary, reference, created_at
             FROM feature_statistics WHERE kind = 'baseline' AND model_version = ?
             ORDER BY feature_name",
        )?;

        let baselines = stmt
            .query_map([model_version], baseline_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(baselines)
    }

    // ==================== Prediction Operations ====================

    /// Record a prediction; transaction ids are unique
    pub fn insert_prediction(&self, record: &PredictionRecord) -> Result<i64> {
        let conn = self.conn.lock();

        let inserted = conn.execute(
            "INSERT INTO predictions (transaction_id, model_version, features, predicted_label, predicted_probability, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.transaction_id,
                record.model_version,
                serde_json::to_string(&record.features)?,
                record.predicted_label,
                record.predicted_probability,
                ts(&record.timestamp),
            ],
        );

        match inserted {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(DriftError::InvalidConfiguration(format!(
                    "transaction {} already has a prediction",
                    record.transaction_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Predictions with `start <= timestamp < end`, oldest first
    pub fn predictions_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        model_version: Option<&str>,
    ) -> Result<Vec<PredictionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, transaction_id, model_version, features, predicted_label, predicted_probability, timestamp
             FROM predictions
             WHERE timestamp >= ?1 AND timestamp < ?2 AND (?3 IS NULL OR model_version = ?3)
             ORDER BY timestamp, id",
        )?;

        let records = stmt
            .query_map(params![ts(&start), ts(&end), model_version], |row| {
                Ok(PredictionRecord {
                    id: Some(row.get(0)?),
                    transaction_id: row.get(1)?,
                    model_version: row.get(2)?,
                    features: get_json(row, 3)?,
                    predicted_label: row.get(4)?,
                    predicted_probability: row.get(5)?,
                    timestamp: get_ts(row, 6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    // ==================== Ground Truth Operations ====================

    /// Record a true label for an existing prediction
    pub fn insert_ground_truth(&self, record: &GroundTruthRecord) -> Result<i64> {
        let conn = self.conn.lock();

        let known: Option<i64> = conn
            .query_row(
                "SELECT id FROM predictions WHERE transaction_id = ?",
                [&record.transaction_id],
                |row| row.get(0),
            )
            .optional()?;
        if known.is_none() {
            return Err(DriftError::NotFound(format!(
                "prediction for transaction {}",
                record.transaction_id
            )));
        }

        conn.execute(
            "INSERT INTO ground_truth (transaction_id, actual_label, label_source, created_at) VALUES (?, ?, ?, ?)",
            params![
                record.transaction_id,
                record.actual_label,
                record.label_source,
                ts(&record.created_at),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Most recently created label per transaction id; corrections replace
    /// earlier labels rather than adding to them
    pub fn latest_ground_truth(&self, transaction_ids: &[String]) -> Result<HashMap<String, GroundTruthRecord>> {
        let conn = self.conn.lock();
        let mut latest = HashMap::new();

        for chunk in transaction_ids.chunks(ID_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT id, transaction_id, actual_label, label_source, created_at
                 FROM ground_truth WHERE transaction_id IN ({})
                 ORDER BY created_at, id",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok(GroundTruthRecord {
                    id: Some(row.get(0)?),
                    transaction_id: row.get(1)?,
                    actual_label: row.get(2)?,
                    label_source: row.get(3)?,
                    created_at: get_ts(row, 4)?,
                })
            })?;

            // Ascending order: later rows overwrite earlier ones
            for record in rows {
                let record = record?;
                latest.insert(record.transaction_id.clone(), record);
            }
        }

        Ok(latest)
    }

    // ==================== Cycle Operations ====================

    /// Persist one completed cycle atomically: the report, its current
    /// snapshots, the metrics point and every alert insert/update.
    ///
    /// Alerts without an id are inserted. On success the new ids are written
    /// back into `alerts` and the report id is returned; on failure nothing
    /// is kept.
    pub fn commit_cycle(
        &self,
        report: &DriftReport,
        point: &MetricsHistoryPoint,
        alerts: &mut [Alert],
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO drift_reports (report_timestamp, model_version, window_start, window_end, window_secs,
                total_predictions, data_drift_detected, concept_drift_detected, performance_degraded, overall_status, payload)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                ts(&report.report_timestamp),
                report.model_version,
                ts(&report.window_start),
                ts(&report.window_end),
                report.window_secs(),
                report.total_predictions as i64,
                report.data_drift_detected,
                report.concept_drift_detected,
                report.performance_degraded,
                report.overall_status.to_string(),
                serde_json::to_string(report)?,
            ],
        )?;
        let report_id = tx.last_insert_rowid();

        for entry in &report.feature_drift {
            let Some(current) = &entry.current else {
                continue;
            };
            tx.execute(
                "INSERT INTO feature_statistics (feature_name, model_version, kind, summary, reference, report_id, created_at)
                 VALUES (?, ?, ?, ?, NULL, ?, ?)",
                params![
                    entry.feature_name,
                    report.model_version,
                    StatisticsKind::Current.to_string(),
                    serde_json::to_string(current)?,
                    report_id,
                    ts(&report.report_timestamp),
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO metrics_history (timestamp, model_version, predictions_count, labels_received,
                accuracy, precision_score, recall, f1_score, auc_roc, avg_psi, max_psi, ks_statistic, alert_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                ts(&point.timestamp),
                point.model_version,
                point.predictions_count as i64,
                point.labels_received as i64,
                point.accuracy,
                point.precision,
                point.recall,
                point.f1_score,
                point.auc_roc,
                point.avg_psi,
                point.max_psi,
                point.ks_statistic,
                point.alert_count as i64,
            ],
        )?;

        let mut assigned = Vec::with_capacity(alerts.len());
        for alert in alerts.iter() {
            match alert.id {
                // Operators may acknowledge or resolve while a cycle runs, so
                // only the columns the lifecycle owns are written, and only
                // while the row is still open.
                Some(id) => {
                    let updated = if alert.resolved {
                        tx.execute(
                            "UPDATE alerts SET resolved = 1, resolved_at = ? WHERE id = ? AND resolved = 0",
                            params![alert.resolved_at.as_ref().map(ts), id],
                        )?
                    } else {
                        tx.execute(
                            "UPDATE alerts SET severity = ?, title = ?, message = ?, metric_value = ?, threshold = ?,
                                recommendation = ?
                             WHERE id = ? AND resolved = 0",
                            params![
                                alert.severity.to_string(),
                                alert.title,
                                alert.message,
                                alert.metric_value,
                                alert.threshold,
                                alert.recommendation,
                                id,
                            ],
                        )?
                    };
                    if updated == 0 {
                        debug!(id, "Alert resolved outside the cycle, transition dropped");
                    }
                    assigned.push(id);
                }
                None => {
                    tx.execute(
                        "INSERT INTO alerts (alert_type, severity, title, message, feature_name, metric_value, threshold,
                            recommendation, triggered_at, acknowledged, acknowledged_at, resolved, resolved_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        params![
                            alert.alert_type.to_string(),
                            alert.severity.to_string(),
                            alert.title,
                            alert.message,
                            alert.feature_name,
                            alert.metric_value,
                            alert.threshold,
                            alert.recommendation,
                            ts(&alert.triggered_at),
                            alert.acknowledged,
                            alert.acknowledged_at.as_ref().map(ts),
                            alert.resolved,
                            alert.resolved_at.as_ref().map(ts),
                        ],
                    )?;
                    assigned.push(tx.last_insert_rowid());
                }
            }
        }

        tx.commit()?;

        for (alert, id) in alerts.iter_mut().zip(assigned) {
            alert.id = Some(id);
        }
        Ok(report_id)
    }

    // ==================== Report Operations ====================

    /// Most recent persisted report, optionally for one model version and one
    /// window size
    pub fn latest_report(&self, model_version: Option<&str>, window_secs: Option<i64>) -> Result<Option<DriftReport>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, payload FROM drift_reports
             WHERE (?1 IS NULL OR model_version = ?1) AND (?2 IS NULL OR window_secs = ?2)
             ORDER BY report_timestamp DESC, id DESC LIMIT 1",
            params![model_version, window_secs],
            |row| {
                let mut report: DriftReport = get_json(row, 1)?;
                report.id = Some(row.get(0)?);
                Ok(report)
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Number of persisted reports
    pub fn report_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM drift_reports", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ==================== Metrics Operations ====================

    /// Metrics points with `start <= timestamp < end`, oldest first
    pub fn metrics_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<MetricsHistoryPoint>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, model_version, predictions_count, labels_received, accuracy, precision_score,
                recall, f1_score, auc_roc, avg_psi, max_psi, ks_statistic, alert_count
             FROM metrics_history WHERE timestamp >= ? AND timestamp < ?
             ORDER BY timestamp, id",
        )?;

        let points = stmt
            .query_map([ts(&start), ts(&end)], |row| {
                Ok(MetricsHistoryPoint {
                    id: Some(row.get(0)?),
                    timestamp: get_ts(row, 1)?,
                    model_version: row.get(2)?,
                    predictions_count: row.get::<_, i64>(3)? as usize,
                    labels_received: row.get::<_, i64>(4)? as usize,
                    accuracy: row.get(5)?,
                    precision: row.get(6)?,
                    recall: row.get(7)?,
                    f1_score: row.get(8)?,
                    auc_roc: row.get(9)?,
                    avg_psi: row.get(10)?,
                    max_psi: row.get(11)?,
                    ks_statistic: row.get(12)?,
                    alert_count: row.get::<_, i64>(13)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(points)
    }

    // ==================== Alert Operations ====================

    /// Alerts newest first; resolved ones only when asked for
    pub fn list_alerts(&self, include_resolved: bool) -> Result<Vec<Alert>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM alerts WHERE (?1 OR resolved = 0) ORDER BY triggered_at DESC, id DESC",
            ALERT_COLUMNS
        ))?;

        let alerts = stmt
            .query_map([include_resolved], alert_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(alerts)
    }

    /// Every alert still open
    pub fn unresolved_alerts(&self) -> Result<Vec<Alert>> {
        self.list_alerts(false)
    }

    pub fn get_alert(&self, id: i64) -> Result<Alert> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM alerts WHERE id = ?", ALERT_COLUMNS),
            [id],
            alert_from_row,
        )
        .optional()?
        .ok_or_else(|| DriftError::NotFound(format!("alert {}", id)))
    }

    /// Flag an alert as seen by an operator. Does not resolve it.
    pub fn acknowledge_alert(&self, id: i64, at: DateTime<Utc>) -> Result<Alert> {
        {
            let conn = self.conn.lock();
            let rows = conn.execute(
                "UPDATE alerts SET acknowledged = 1, acknowledged_at = COALESCE(acknowledged_at, ?) WHERE id = ?",
                params![ts(&at), id],
            )?;
            if rows == 0 {
                return Err(DriftError::NotFound(format!("alert {}", id)));
            }
        }
        self.get_alert(id)
    }

    /// Close an alert by hand; resolving twice keeps the first time
    pub fn resolve_alert(&self, id: i64, at: DateTime<Utc>) -> Result<Alert> {
        {
            let conn = self.conn.lock();
            let rows = conn.execute(
                "UPDATE alerts SET resolved = 1, resolved_at = COALESCE(resolved_at, ?) WHERE id = ?",
                params![ts(&at), id],
            )?;
            if rows == 0 {
                return Err(DriftError::NotFound(format!("alert {}", id)));
            }
        }
        self.get_alert(id)
    }

    // ==================== Retention ====================

    /// Delete everything older than `cutoff` in one transaction.
    ///
    /// Baselines and unresolved alerts are kept regardless of age; resolved
    /// alerts age by their resolution time.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<PruneStats> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let cutoff = ts(&cutoff);

        let stats = PruneStats {
            predictions: tx.execute("DELETE FROM predictions WHERE timestamp < ?", [&cutoff])?,
            ground_truth: tx.execute("DELETE FROM ground_truth WHERE created_at < ?", [&cutoff])?,
            feature_statistics: tx.execute(
                "DELETE FROM feature_statistics WHERE kind = 'current' AND created_at < ?",
                [&cutoff],
            )?,
            drift_reports: tx.execute("DELETE FROM drift_reports WHERE report_timestamp < ?", [&cutoff])?,
            metrics_history: tx.execute("DELETE FROM metrics_history WHERE timestamp < ?", [&cutoff])?,
            alerts: tx.execute(
                "DELETE FROM alerts WHERE resolved = 1 AND resolved_at < ?",
                [&cutoff],
            )?,
        };

        tx.commit()?;
        Ok(stats)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn count_rows(&self, table: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

const ALERT_COLUMNS: &str = "id, alert_type, severity, title, message, feature_name, metric_value, threshold, \
    recommendation, triggered_at, acknowledged, acknowledged_at, resolved, resolved_at";

/// Fixed-width RFC 3339 so text order matches time order
pub fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => get_ts(row, idx).map(Some),
        None => Ok(None),
    }
}

fn get_json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn get_parsed<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: String| conversion_error(idx, e))
}

fn model_from_row(row: &Row<'_>) -> rusqlite::Result<ModelVersion> {
    Ok(ModelVersion {
        version: row.get(0)?,
        registered_at: get_ts(row, 1)?,
        training_samples: row.get::<_, i64>(2)? as usize,
        training_metrics: get_json(row, 3)?,
        baseline_positive_rate: row.get(4)?,
        active: row.get(5)?,
    })
}

fn baseline_from_row(row: &Row<'_>) -> rusqlite::Result<BaselineSummary> {
    let summary: FeatureSummary = get_json(row, 2)?;
    let reference: Vec<f64> = match row.get::<_, Option<String>>(3)? {
        Some(_) => get_json(row, 3)?,
        None => Vec::new(),
    };
    Ok(BaselineSummary {
        feature_name: row.get(0)?,
        model_version: row.get(1)?,
        summary,
        reference,
        created_at: get_ts(row, 4)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: Some(row.get(0)?),
        alert_type: get_parsed(row, 1)?,
        severity: get_parsed(row, 2)?,
        title: row.get(3)?,
        message: row.get(4)?,
        feature_name: row.get(5)?,
        metric_value: row.get(6)?,
        threshold: row.get(7)?,
        recommendation: row.get(8)?,
        triggered_at: get_ts(row, 9)?,
        acknowledged: row.get(10)?,
        acknowledged_at: get_opt_ts(row, 11)?,
        resolved: row.get(12)?,
        resolved_at: get_opt_ts(row, 13)?,
    })
}
