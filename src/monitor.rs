//! Monitoring cycle orchestration
//!
//! A tick resolves the model version, claims it (overlapping ticks for the
//! same version are dropped), aggregates the window, scores it, commits the
//! report with its metrics point and alert transitions in one transaction,
//! prunes, and finally publishes.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::aggregator::{WindowAggregator, WindowSnapshot};
use crate::alerts::{classify_report, AlertChange, AlertStateMachine};
use crate::config::Config;
use crate::database::Database;
use crate::drift::{self, DriftScorer};
use crate::error::{DriftError, Result};
use crate::models::{
    BaselineSummary, CheckStatus, DriftReport, FeatureDrift, MetricsHistoryPoint, ModelVersion, MonitorStatus,
    PerformanceStatus, PruneStats, PREDICTION_FEATURE,
};
use crate::publisher::ReportPublisher;

/// Everything one completed cycle produced
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub report: DriftReport,
    pub changes: Vec<AlertChange>,
    pub pruned: Option<PruneStats>,
}

/// Removes its model version from the in-flight set when dropped
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    version: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.version);
    }
}

/// The periodic driver. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Monitor {
    config: Arc<Config>,
    db: Database,
    scorer: DriftScorer,
    aggregator: WindowAggregator,
    publisher: ReportPublisher,
    in_flight: Arc<Mutex<HashSet<String>>>,
    status: Arc<RwLock<MonitorStatus>>,
}

impl Monitor {
    pub fn new(config: Arc<Config>, db: Database, publisher: ReportPublisher) -> Self {
        Self {
            scorer: DriftScorer::new(config.thresholds.clone()),
            aggregator: WindowAggregator::new(db.clone()),
            config,
            db,
            publisher,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            status: Arc::new(RwLock::new(MonitorStatus::default())),
        }
    }

    pub fn status(&self) -> MonitorStatus {
        self.status.read().clone()
    }

    pub fn publisher(&self) -> &ReportPublisher {
        &self.publisher
    }

    /// Configured override, else the registry's active version
    pub fn resolve_model_version(&self) -> Result<ModelVersion> {
        match &self.config.monitor.model_version {
            Some(version) => self.db.model_version(version),
            None => self.db.active_model_version(),
        }
    }

    fn try_begin(&self, version: &str) -> Option<InFlightGuard> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(version.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: self.in_flight.clone(),
            version: version.to_string(),
        })
    }

    /// Run one cycle ending at `now`.
    ///
    /// Returns `Ok(None)` when a cycle for the same model version is still
    /// running. Errors leave nothing persisted and nothing published.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<Option<CycleOutcome>> {
        let result = self.resolve_model_version().and_then(|model| {
            let Some(_guard) = self.try_begin(&model.version) else {
                warn!(model_version = %model.version, "Previous cycle still running, tick dropped");
                self.status.write().ticks_dropped += 1;
                return Ok(None);
            };
            self.run_cycle(&model, now).map(Some)
        });

        match &result {
            Ok(Some(outcome)) => {
                let mut status = self.status.write();
                status.last_cycle_at = Some(outcome.report.report_timestamp);
                status.last_status = Some(outcome.report.overall_status);
                status.last_error = None;
                status.cycles_completed += 1;
                drop(status);
                self.publisher.publish(&outcome.report);
            }
            Ok(None) => {}
            Err(e) => {
                if e.is_cycle_fatal() {
                    error!("Monitoring cycle aborted: {}", e);
                } else {
                    warn!("Monitoring cycle skipped: {}", e);
                }
                let mut status = self.status.write();
                status.last_error = Some(e.to_string());
                status.cycles_skipped += 1;
            }
        }

        result
    }

    fn run_cycle(&self, model: &ModelVersion, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let started = Instant::now();
        let window_start = self.config.monitor.window_start(now)?;
        info!(model_version = %model.version, %window_start, window_end = %now, "Starting monitoring cycle");

        let feature_baselines = self.feature_baselines(&model.version)?;
        let prediction_baseline = self.db.baseline(PREDICTION_FEATURE, &model.version)?;
        let snapshot = self.aggregator.collect(window_start, now, &model.version)?;

        let mut report = self.score(model, &feature_baselines, &prediction_baseline, &snapshot, now)?;

        let mut machine = AlertStateMachine::from_unresolved(self.db.unresolved_alerts()?);
        let mut changes = machine.apply(&classify_report(&report), now);
        let point = MetricsHistoryPoint::from_report(&report, machine.open_count());

        let mut alerts: Vec<_> = changes.iter().map(|c| c.alert.clone()).collect();
        let report_id = self.db.commit_cycle(&report, &point, &mut alerts)?;
        report.id = Some(report_id);
        for (change, alert) in changes.iter_mut().zip(alerts) {
            change.alert = alert;
        }

        let pruned = if self.config.retention.enabled {
            match self.config.retention.cutoff(now).and_then(|cutoff| self.db.prune(cutoff)) {
                Ok(stats) => {
                    if stats.total() > 0 {
                        info!(rows = stats.total(), "Pruned records past retention");
                    }
                    Some(stats)
                }
                Err(e) => {
                    // The cycle is already committed; pruning retries next tick
                    warn!("Retention pruning failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        info!(
            model_version = %model.version,
            report_id,
            status = %report.overall_status,
            predictions = report.total_predictions,
            alert_changes = changes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Monitoring cycle complete"
        );

        Ok(CycleOutcome { report, changes, pruned })
    }

    /// Baselines of the tracked features. An explicitly tracked feature
    /// without a baseline skips the model version.
    fn feature_baselines(&self, version: &str) -> Result<Vec<BaselineSummary>> {
        match &self.config.monitor.tracked_features {
            Some(features) => features.iter().map(|f| self.db.baseline(f, version)).collect(),
            None => {
                let baselines: Vec<_> = self
                    .db
                    .baselines(version)?
                    .into_iter()
                    .filter(|b| b.feature_name != PREDICTION_FEATURE)
                    .collect();
                if baselines.is_empty() {
                    return Err(DriftError::NotFound(format!("feature baselines for model version {}", version)));
                }
                Ok(baselines)
            }
        }
    }

    fn score(
        &self,
        model: &ModelVersion,
        feature_baselines: &[BaselineSummary],
        prediction_baseline: &BaselineSummary,
        snapshot: &WindowSnapshot,
        now: DateTime<Utc>,
    ) -> Result<DriftReport> {
        let mut feature_drift: Vec<FeatureDrift> = Vec::with_capacity(feature_baselines.len());
        for baseline in feature_baselines {
            let values = snapshot.feature_values(&baseline.feature_name);
            match self.scorer.score_feature(baseline, &values) {
                Ok(entry) => feature_drift.push(entry),
                Err(e) if !e.is_cycle_fatal() => {
                    debug!(feature = %baseline.feature_name, "Feature skipped: {}", e);
                    feature_drift.push(self.scorer.unknown_feature(baseline, &e));
                }
                Err(e) => return Err(e),
            }
        }

        let probabilities = snapshot.probabilities();
        let prediction_drift = match self.scorer.score_predictions(
            prediction_baseline,
            model.baseline_positive_rate,
            &probabilities,
            &snapshot.predicted_labels(),
        ) {
            Ok(entry) => entry,
            Err(e) if !e.is_cycle_fatal() => {
                debug!("Prediction drift skipped: {}", e);
                self.scorer.unknown_predictions(
                    model.baseline_positive_rate,
                    prediction_baseline.reference.len(),
                    probabilities.len(),
                    &e,
                )
            }
            Err(e) => return Err(e),
        };

        let performance = self
            .scorer
            .score_performance(&snapshot.labeled_pairs(), &model.training_metrics);

        let overall_status = drift::overall_status(&feature_drift, &prediction_drift, &performance);
        let recommendation = drift::recommendation(&feature_drift);

        Ok(DriftReport {
            id: None,
            report_timestamp: now,
            model_version: model.version.clone(),
            window_start: snapshot.start,
            window_end: snapshot.end,
            total_predictions: snapshot.predictions.len(),
            data_drift_detected: feature_drift.iter().any(|f| f.status == CheckStatus::Drifted),
            concept_drift_detected: prediction_drift.status == CheckStatus::Drifted,
            performance_degraded: performance.status == PerformanceStatus::Degraded,
            feature_drift,
            prediction_drift,
            performance,
            overall_status,
            recommendation,
        })
    }

    /// Tick until `shutdown` fires.
    ///
    /// Each tick's cycle runs on the blocking pool so a slow cycle does not
    /// delay the next tick, which then finds the version claimed and drops
    /// out. Cycles in progress at shutdown run to completion.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let start = tokio::time::Instant::now()
            + std::time::Duration::from_secs(self.config.monitor.initial_delay_secs);
        let mut interval = tokio::time::interval_at(start, self.config.monitor.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = JoinSet::new();

        info!(
            interval_secs = self.config.monitor.interval_secs,
            window_secs = self.config.monitor.window_secs,
            "Monitor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let monitor = self.clone();
                    cycles.spawn_blocking(move || {
                        // Outcome and errors are logged inside tick
                        let _ = monitor.tick(Utc::now());
                    });
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        error!("Monitoring cycle panicked: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Monitor shutting down");
                    break;
                }
            }
        }

        while cycles.join_next().await.is_some() {}
        info!("Monitor stopped");
    }
}
