pub mod aggregator;
pub mod alerts;
pub mod api;
pub mod config;
pub mod database;
pub mod drift;
pub mod error;
pub mod models;
pub mod monitor;
pub mod publisher;
pub mod stats;

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use config::Config;
use database::Database;
use models::{
    Alert, DriftReport, GroundTruthRecord, ModelVersion, MonitorStatus, PerformanceMetrics, PredictionRecord,
    PruneStats,
};
use monitor::{CycleOutcome, Monitor};
use publisher::ReportPublisher;

/// Core driftwatch instance
pub struct DriftWatch {
    config: Arc<Config>,
    db: Database,
    monitor: Monitor,
}

impl DriftWatch {
    /// Validate the configuration and open the configured database.
    ///
    /// Refuses to start on invalid thresholds.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let db = Database::open(config.db_path())?;
        Ok(Self::with_database(config, db))
    }

    /// Build an instance over an already opened database. The config is
    /// assumed valid.
    pub fn with_database(config: Config, db: Database) -> Self {
        let config = Arc::new(config);
        let publisher = ReportPublisher::new(config.api.channel_capacity);
        let monitor = Monitor::new(config.clone(), db.clone(), publisher);
        Self { config, db, monitor }
    }

    /// Register a model version with baselines built from its training
    /// records. Without an explicit positive rate the training records'
    /// predicted positive fraction is used.
    pub fn register_model(
        &self,
        version: &str,
        records: &[PredictionRecord],
        training_metrics: PerformanceMetrics,
        positive_rate: Option<f64>,
    ) -> Result<ModelVersion> {
        let now = Utc::now();
        let baselines = aggregator::build_baselines(version, records, now)?;

        let baseline_positive_rate = positive_rate.unwrap_or_else(|| {
            let positives = records.iter().filter(|r| r.predicted_label == 1).count();
            positives as f64 / records.len() as f64
        });
        if !(0.0..=1.0).contains(&baseline_positive_rate) {
            anyhow::bail!("Positive rate must be within [0, 1], got {}", baseline_positive_rate);
        }

        let model = ModelVersion {
            version: version.to_string(),
            registered_at: now,
            training_samples: records.len(),
            training_metrics,
            baseline_positive_rate,
            active: true,
        };
        self.db.register_model(&model, &baselines)?;

        info!(
            model_version = version,
            samples = records.len(),
            features = baselines.len() - 1,
            "Registered model version"
        );
        Ok(model)
    }

    /// Store predictions; returns how many were inserted
    pub fn ingest_predictions(&self, records: &[PredictionRecord]) -> Result<usize> {
        for record in records {
            self.db.insert_prediction(record)?;
        }
        Ok(records.len())
    }

    /// Store ground-truth labels; returns how many were inserted
    pub fn ingest_labels(&self, records: &[GroundTruthRecord]) -> Result<usize> {
        for record in records {
            self.db.insert_ground_truth(record)?;
        }
        Ok(records.len())
    }

    /// Run one monitoring cycle ending now
    pub fn run_cycle(&self) -> Result<Option<CycleOutcome>> {
        Ok(self.monitor.tick(Utc::now())?)
    }

    pub fn latest_report(&self, model_version: Option<&str>) -> Result<Option<DriftReport>> {
        Ok(self.db.latest_report(model_version, None)?)
    }

    pub fn alerts(&self, include_resolved: bool) -> Result<Vec<Alert>> {
        Ok(self.db.list_alerts(include_resolved)?)
    }

    pub fn acknowledge_alert(&self, id: i64) -> Result<Alert> {
        Ok(self.db.acknowledge_alert(id, Utc::now())?)
    }

    pub fn resolve_alert(&self, id: i64) -> Result<Alert> {
        Ok(self.db.resolve_alert(id, Utc::now())?)
    }

    /// Delete records older than the retention horizon
    pub fn prune(&self) -> Result<PruneStats> {
        let cutoff = self.config.retention.cutoff(Utc::now())?;
        let stats = self.db.prune(cutoff)?;
        info!(rows = stats.total(), "Pruned records past retention");
        Ok(stats)
    }

    pub fn status(&self) -> MonitorStatus {
        self.monitor.status()
    }

    pub fn active_model(&self) -> Result<ModelVersion> {
        Ok(self.monitor.resolve_model_version()?)
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Runs the periodic monitor and the API until shut down
pub struct Daemon {
    driftwatch: DriftWatch,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Daemon {
    pub fn new(driftwatch: DriftWatch) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            driftwatch,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Sender that stops a running daemon
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run until the shutdown handle fires or the API server fails
    pub async fn run(mut self) -> Result<()> {
        let config = self.driftwatch.config.clone();

        let (monitor_tx, monitor_rx) = mpsc::channel::<()>(1);
        let monitor = self.driftwatch.monitor.clone();
        let monitor_handle = tokio::spawn(monitor.run(monitor_rx));

        let (api_tx, mut api_rx) = mpsc::channel::<()>(1);
        let mut api_handle = if config.api.enabled {
            let state = Arc::new(api::AppState::new(
                config.clone(),
                self.driftwatch.db.clone(),
                self.driftwatch.monitor.clone(),
            ));
            Some(tokio::spawn(api::serve(state, async move {
                api_rx.recv().await;
            })))
        } else {
            info!("Monitoring API is disabled");
            None
        };

        info!("Daemon started");

        let mut result = Ok(());
        tokio::select! {
            _ = self.shutdown_rx.recv() => {
                info!("Shutdown signal received");
            }
            joined = async {
                match api_handle.as_mut() {
                    Some(handle) => handle.await,
                    None => std::future::pending().await,
                }
            } => {
                api_handle = None;
                match joined {
                    Ok(Err(e)) => {
                        error!("Monitoring API failed: {:#}", e);
                        result = Err(e);
                    }
                    Err(e) => {
                        error!("Monitoring API task panicked: {}", e);
                        result = Err(e.into());
                    }
                    Ok(Ok(())) => warn!("Monitoring API stopped"),
                }
            }
        }

        let _ = api_tx.send(()).await;
        let _ = monitor_tx.send(()).await;
        if let Some(handle) = api_handle {
            match handle.await {
                Ok(Err(e)) => warn!("Monitoring API shutdown error: {:#}", e),
                Err(e) => warn!("Monitoring API task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        if let Err(e) = monitor_handle.await {
            error!("Monitor task panicked: {}", e);
        }

        info!("Daemon stopped");
        result
    }
}
