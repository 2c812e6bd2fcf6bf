//! Alert lifecycle
//!
//! Every (type, feature) key moves through `none -> open -> escalated ->
//! resolved`. All transitions go through [`AlertStateMachine::apply`], which
//! owns the keyed map of unresolved alerts, so a key can never hold two open
//! alerts at once.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::models::{
    Alert, AlertKey, AlertType, CheckStatus, DriftReport, HealthStatus, PerformanceStatus,
};

/// One check's verdict for one alert key in one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub key: AlertKey,
    pub severity: HealthStatus,
    pub metric_value: f64,
    pub threshold: f64,
    pub title: String,
    pub message: String,
    pub recommendation: String,
}

/// What happened to an alert during a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened,
    Escalated { from: HealthStatus },
    Resolved,
}

/// An alert row to persist and the transition that produced it
#[derive(Debug, Clone)]
pub struct AlertChange {
    pub transition: Transition,
    pub alert: Alert,
}

#[derive(Debug, Default)]
pub struct AlertStateMachine {
    open: HashMap<AlertKey, Alert>,
}

impl AlertStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the map from persisted unresolved alerts.
    ///
    /// Should storage ever hold two for one key, the oldest is kept.
    pub fn from_unresolved(alerts: Vec<Alert>) -> Self {
        let mut open: HashMap<AlertKey, Alert> = HashMap::new();
        for alert in alerts.into_iter().filter(|a| !a.resolved) {
            let key = alert.key();
            match open.get(&key) {
                Some(existing) if existing.triggered_at <= alert.triggered_at => {
                    warn!(key = %key, id = ?alert.id, "Duplicate unresolved alert ignored");
                }
                _ => {
                    open.insert(key, alert);
                }
            }
        }
        Self { open }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn get(&self, key: &AlertKey) -> Option<&Alert> {
        self.open.get(key)
    }

    /// Drive one cycle's classifications through the lifecycle.
    ///
    /// Unknown classifications leave their key untouched.
    pub fn apply(&mut self, classifications: &[Classification], at: DateTime<Utc>) -> Vec<AlertChange> {
        let mut changes = Vec::new();

        for c in classifications {
            match c.severity {
                HealthStatus::Unknown => {}
                HealthStatus::Healthy => {
                    if let Some(mut alert) = self.open.remove(&c.key) {
                        alert.resolved = true;
                        alert.resolved_at = Some(at);
                        info!(key = %c.key, id = ?alert.id, "Alert resolved");
                        changes.push(AlertChange {
                            transition: Transition::Resolved,
                            alert,
                        });
                    }
                }
                severity => match self.open.get_mut(&c.key) {
                    None => {
                        let alert = Alert {
                            id: None,
                            alert_type: c.key.alert_type,
                            severity,
                            title: c.title.clone(),
                            message: c.message.clone(),
                            feature_name: c.key.feature_name.clone(),
                            metric_value: c.metric_value,
                            threshold: c.threshold,
                            recommendation: c.recommendation.clone(),
                            triggered_at: at,
                            acknowledged: false,
                            acknowledged_at: None,
                            resolved: false,
                            resolved_at: None,
                        };
                        info!(key = %c.key, severity = %severity, "Alert opened");
                        self.open.insert(c.key.clone(), alert.clone());
                        changes.push(AlertChange {
                            transition: Transition::Opened,
                            alert,
                        });
                    }
                    Some(alert) if severity > alert.severity => {
                        let from = alert.severity;
                        alert.severity = severity;
                        alert.title = c.title.clone();
                        alert.message = c.message.clone();
                        alert.recommendation = c.recommendation.clone();
                        alert.metric_value = c.metric_value;
                        alert.threshold = c.threshold;
                        info!(key = %c.key, from = %from, to = %severity, "Alert escalated");
                        changes.push(AlertChange {
                            transition: Transition::Escalated { from },
                            alert: alert.clone(),
                        });
                    }
                    Some(_) => {}
                },
            }
        }

        changes
    }
}

/// Classifications for every alert key a report speaks to
pub fn classify_report(report: &DriftReport) -> Vec<Classification> {
    let mut out = Vec::with_capacity(report.feature_drift.len() + 2);

    for entry in &report.feature_drift {
        let severity_label = entry.severity.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string());
        out.push(Classification {
            key: AlertKey::new(AlertType::DataDrift, Some(&entry.feature_name)),
            severity: entry.health,
            metric_value: entry.psi.unwrap_or(0.0),
            threshold: entry.threshold,
            title: format!("Data drift on {}", entry.feature_name),
            message: format!(
                "Feature '{}' has PSI={:.2} (threshold={}, severity {})",
                entry.feature_name,
                entry.psi.unwrap_or(0.0),
                entry.threshold,
                severity_label
            ),
            recommendation: feature_recommendation(entry.status, &entry.feature_name),
        });
    }

    let pd = &report.prediction_drift;
    let rate_shift = pd
        .current_positive_rate
        .map_or(0.0, |rate| (rate - pd.baseline_positive_rate).abs());
    out.push(Classification {
        key: AlertKey::new(AlertType::ConceptDrift, None),
        severity: pd.health,
        metric_value: rate_shift,
        threshold: pd.min_rate_delta,
        title: "Prediction distribution drift".to_string(),
        message: format!(
            "Positive rate shifted from {:.4} to {:.4} (KS={:.3}, p={:.2e})",
            pd.baseline_positive_rate,
            pd.current_positive_rate.unwrap_or(0.0),
            pd.statistic.unwrap_or(0.0),
            pd.p_value.unwrap_or(1.0)
        ),
        recommendation: "Review recent labels and input data; the relationship between inputs and outcome may have changed."
            .to_string(),
    });

    let perf = &report.performance;
    let worst = perf.worst_relative_drop.unwrap_or(0.0);
    out.push(Classification {
        key: AlertKey::new(AlertType::PerformanceDegradation, None),
        severity: perf.health,
        metric_value: worst,
        threshold: perf.margin,
        title: "Model performance degradation".to_string(),
        message: if perf.status == PerformanceStatus::Degraded {
            format!(
                "{} dropped up to {:.1}% below training over {} labeled predictions",
                perf.degraded_metrics.join(", "),
                worst * 100.0,
                perf.matched_count
            )
        } else {
            format!("Metrics within {:.0}% of training", perf.margin * 100.0)
        },
        recommendation: "Schedule retraining on recent labeled data.".to_string(),
    });

    out
}

fn feature_recommendation(status: CheckStatus, feature: &str) -> String {
    match status {
        CheckStatus::Drifted => format!(
            "URGENT: Retrain model. Feature '{}' distribution has shifted significantly.",
            feature
        ),
        _ => format!("Monitor '{}' closely and plan retraining.", feature),
    }
}
