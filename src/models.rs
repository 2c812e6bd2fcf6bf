use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A prediction written by the serving path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub transaction_id: String,
    pub model_version: String,
    pub features: BTreeMap<String, f64>,
    pub predicted_label: u8,
    pub predicted_probability: f64,
    pub timestamp: DateTime<Utc>,
}

/// A true label reported after the fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub transaction_id: String,
    pub actual_label: u8,
    #[serde(default)]
    pub label_source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Distributional summary of one sample set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    /// `bin_counts.len() + 1` ascending edges
    pub bin_edges: Vec<f64>,
    pub bin_counts: Vec<u64>,
    pub sample_count: usize,
}

/// Name under which the predicted-probability baseline is stored
pub const PREDICTION_FEATURE: &str = "prediction_proba";

/// Frozen training-time summary for one (feature, model version)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSummary {
    pub feature_name: String,
    pub model_version: String,
    pub summary: FeatureSummary,
    /// Down-sampled raw values, kept for two-sample tests
    #[serde(default)]
    pub reference: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

/// Whether a feature_statistics row is a baseline or a per-cycle snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticsKind {
    Baseline,
    Current,
}

impl std::fmt::Display for StatisticsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatisticsKind::Baseline => write!(f, "baseline"),
            StatisticsKind::Current => write!(f, "current"),
        }
    }
}

/// Registered model version with its training-time reference metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version: String,
    pub registered_at: DateTime<Utc>,
    pub training_samples: usize,
    pub training_metrics: PerformanceMetrics,
    pub baseline_positive_rate: f64,
    pub active: bool,
}

/// Classification metrics over matched (prediction, label) pairs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub auc_roc: Option<f64>,
}

impl PerformanceMetrics {
    /// Look up a metric by its config name
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "accuracy" => self.accuracy,
            "precision" => self.precision,
            "recall" => self.recall,
            "f1_score" => self.f1_score,
            "auc_roc" => self.auc_roc,
            _ => None,
        }
    }
}

/// Severity ladder shared by individual checks and the overall report.
///
/// `Unknown` sorts lowest so it never masks a real classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Warning,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(HealthStatus::Unknown),
            "healthy" => Ok(HealthStatus::Healthy),
            "warning" => Ok(HealthStatus::Warning),
            "critical" => Ok(HealthStatus::Critical),
            other => Err(format!("Unknown health status: {}", other)),
        }
    }
}

/// PSI severity ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsiSeverity {
    /// Stable
    None,
    /// Moderate shift, watch closely
    Moderate,
    /// Drifted, action needed
    High,
}

impl PsiSeverity {
    pub fn health(&self) -> HealthStatus {
        match self {
            PsiSeverity::None => HealthStatus::Healthy,
            PsiSeverity::Moderate => HealthStatus::Warning,
            PsiSeverity::High => HealthStatus::Critical,
        }
    }
}

impl std::fmt::Display for PsiSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PsiSeverity::None => write!(f, "none"),
            PsiSeverity::Moderate => write!(f, "moderate"),
            PsiSeverity::High => write!(f, "high"),
        }
    }
}

/// Outcome of one drift check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Stable,
    Drifted,
    Unknown,
}

/// PSI entry for one tracked feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub feature_name: String,
    pub status: CheckStatus,
    pub psi: Option<f64>,
    pub severity: Option<PsiSeverity>,
    pub health: HealthStatus,
    /// Threshold the score was classified against
    pub threshold: f64,
    pub baseline: FeatureSummary,
    pub current: Option<FeatureSummary>,
    pub mean_change_pct: Option<f64>,
    pub std_change_pct: Option<f64>,
    /// Why the entry is unknown, when it is
    pub skipped_reason: Option<String>,
}

/// KS entry for the predicted-probability distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionDrift {
    pub status: CheckStatus,
    pub health: HealthStatus,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub p_value_threshold: f64,
    pub baseline_positive_rate: f64,
    pub current_positive_rate: Option<f64>,
    /// Smallest absolute positive-rate shift that counts as drift
    #[serde(default)]
    pub min_rate_delta: f64,
    pub change_pct: Option<f64>,
    pub baseline_samples: usize,
    pub current_samples: usize,
    pub skipped_reason: Option<String>,
}

/// Outcome of the performance comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceStatus {
    Passed,
    Degraded,
    Unknown,
}

/// Performance entry over matched ground truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceCheck {
    pub status: PerformanceStatus,
    pub health: HealthStatus,
    pub matched_count: usize,
    pub metrics: PerformanceMetrics,
    pub training: PerformanceMetrics,
    pub degraded_metrics: Vec<String>,
    /// Largest relative drop below the training value, if any metric dropped
    pub worst_relative_drop: Option<f64>,
    pub margin: f64,
}

/// One monitoring cycle's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    #[serde(default)]
    pub id: Option<i64>,
    pub report_timestamp: DateTime<Utc>,
    pub model_version: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_predictions: usize,
    pub feature_drift: Vec<FeatureDrift>,
    pub prediction_drift: PredictionDrift,
    pub performance: PerformanceCheck,
    pub data_drift_detected: bool,
    pub concept_drift_detected: bool,
    pub performance_degraded: bool,
    pub overall_status: HealthStatus,
    pub recommendation: String,
}

impl DriftReport {
    pub fn window_secs(&self) -> i64 {
        (self.window_end - self.window_start).num_seconds()
    }

    /// Scored (non-unknown) PSI values
    pub fn psi_scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.feature_drift.iter().filter_map(|f| f.psi)
    }
}

/// Kind of condition an alert tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    DataDrift,
    ConceptDrift,
    PerformanceDegradation,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::DataDrift => write!(f, "data_drift"),
            AlertType::ConceptDrift => write!(f, "concept_drift"),
            AlertType::PerformanceDegradation => write!(f, "performance_degradation"),
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data_drift" => Ok(AlertType::DataDrift),
            "concept_drift" => Ok(AlertType::ConceptDrift),
            "performance_degradation" => Ok(AlertType::PerformanceDegradation),
            other => Err(format!("Unknown alert type: {}", other)),
        }
    }
}

/// Identity of an alert lifecycle: at most one unresolved alert per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    pub alert_type: AlertType,
    pub feature_name: Option<String>,
}

impl AlertKey {
    pub fn new(alert_type: AlertType, feature_name: Option<&str>) -> Self {
        Self {
            alert_type,
            feature_name: feature_name.map(str::to_string),
        }
    }
}

impl std::fmt::Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.feature_name {
            Some(feature) => write!(f, "{}:{}", self.alert_type, feature),
            None => write!(f, "{}", self.alert_type),
        }
    }
}

/// Alert lifecycle entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Option<i64>,
    pub alert_type: AlertType,
    pub severity: HealthStatus,
    pub title: String,
    pub message: String,
    pub feature_name: Option<String>,
    pub metric_value: f64,
    pub threshold: f64,
    pub recommendation: String,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn key(&self) -> AlertKey {
        AlertKey::new(self.alert_type, self.feature_name.as_deref())
    }
}

/// Per-cycle time series row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsHistoryPoint {
    #[serde(default)]
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub model_version: String,
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

impl MetricsHistoryPoint {
    /// Summarize a report plus the number of alerts open after the cycle
    pub fn from_report(report: &DriftReport, alert_count: usize) -> Self {
        let scores: Vec<f64> = report.psi_scores().collect();
        let (avg_psi, max_psi) = if scores.is_empty() {
            (None, None)
        } else {
            let sum: f64 = scores.iter().sum();
            let max = scores.iter().cloned().fold(f64::MIN, f64::max);
            (Some(sum / scores.len() as f64), Some(max))
        };
        let metrics = &report.performance.metrics;

        Self {
            id: None,
            timestamp: report.report_timestamp,
            model_version: report.model_version.clone(),
            predictions_count: report.total_predictions,
            labels_received: report.performance.matched_count,
            accuracy: metrics.accuracy,
            precision: metrics.precision,
            recall: metrics.recall,
            f1_score: metrics.f1_score,
            auc_roc: metrics.auc_roc,
            avg_psi,
            max_psi,
            ks_statistic: report.prediction_drift.statistic,
            alert_count,
        }
    }
}

/// Liveness of the scheduler, served on the health endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_status: Option<HealthStatus>,
    pub last_error: Option<String>,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub ticks_dropped: u64,
}

/// Rows removed by one retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneStats {
    pub predictions: usize,
    pub ground_truth: usize,
    pub feature_statistics: usize,
    pub drift_reports: usize,
    pub metrics_history: usize,
    pub alerts: usize,
}

impl PruneStats {
    pub fn total(&self) -> usize {
        self.predictions
            + self.ground_truth
            + self.feature_statistics
            + self.drift_reports
            + self.metrics_history
            + self.alerts
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Report of a window with no data: every check unknown
    pub fn empty_report(at: DateTime<Utc>, model_version: &str) -> DriftReport {
        DriftReport {
            id: None,
            report_timestamp: at,
            model_version: model_version.to_string(),
            window_start: at - chrono::Duration::hours(1),
            window_end: at,
            total_predictions: 0,
            feature_drift: Vec::new(),
            prediction_drift: PredictionDrift {
                status: CheckStatus::Unknown,
                health: HealthStatus::Unknown,
                statistic: None,
                p_value: None,
                p_value_threshold: 0.05,
                baseline_positive_rate: 0.02,
                current_positive_rate: None,
                min_rate_delta: 0.03,
                change_pct: None,
                baseline_samples: 0,
                current_samples: 0,
                skipped_reason: None,
            },
            performance: PerformanceCheck {
                status: PerformanceStatus::Unknown,
                health: HealthStatus::Unknown,
                matched_count: 0,
                metrics: PerformanceMetrics::default(),
                training: PerformanceMetrics::default(),
                degraded_metrics: Vec::new(),
                worst_relative_drop: None,
                margin: 0.05,
            },
            data_drift_detected: false,
            concept_drift_detected: false,
            performance_degraded: false,
            overall_status: HealthStatus::Unknown,
            recommendation: String::new(),
        }
    }

    pub fn open_alert(alert_type: AlertType, feature: Option<&str>, at: DateTime<Utc>) -> Alert {
        Alert {
            id: None,
            alert_type,
            severity: HealthStatus::Warning,
            title: format!("{} alert", alert_type),
            message: "threshold exceeded".to_string(),
            feature_name: feature.map(str::to_string),
            metric_value: 0.15,
            threshold: 0.1,
            recommendation: String::new(),
            triggered_at: at,
            acknowledged: false,
            acknowledged_at: None,
            resolved: false,
            resolved_at: None,
        }
    }
}
