//! Window aggregation
//!
//! Pulls the predictions of one half-open window plus their latest labels,
//! and turns them into the sample sets the scorer works on. Also builds the
//! frozen baselines a model version is registered with.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::database::Database;
use crate::drift::LabeledPrediction;
use crate::error::{DriftError, Result};
use crate::models::{BaselineSummary, GroundTruthRecord, PredictionRecord, PREDICTION_FEATURE};
use crate::stats;

/// Upper bound on the stored predicted-probability reference sample
pub const REFERENCE_SAMPLE_SIZE: usize = 2000;

/// Point-in-time view of one window
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub model_version: String,
    pub predictions: Vec<PredictionRecord>,
    /// Latest label per transaction id, for predictions in the window only
    pub labels: HashMap<String, GroundTruthRecord>,
}

impl WindowSnapshot {
    /// Values of one feature; records that lack it are skipped
    pub fn feature_values(&self, feature: &str) -> Vec<f64> {
        self.predictions
            .iter()
            .filter_map(|p| p.features.get(feature).copied())
            .collect()
    }

    pub fn probabilities(&self) -> Vec<f64> {
        self.predictions.iter().map(|p| p.predicted_probability).collect()
    }

    pub fn predicted_labels(&self) -> Vec<u8> {
        self.predictions.iter().map(|p| p.predicted_label).collect()
    }

    /// Predictions joined with their label, one pair per transaction
    pub fn labeled_pairs(&self) -> Vec<LabeledPrediction> {
        self.predictions
            .iter()
            .filter_map(|p| {
                self.labels.get(&p.transaction_id).map(|gt| LabeledPrediction {
                    predicted_label: p.predicted_label,
                    predicted_probability: p.predicted_probability,
                    actual_label: gt.actual_label,
                })
            })
            .collect()
    }
}

/// Reads closed windows out of the store
#[derive(Clone)]
pub struct WindowAggregator {
    db: Database,
}

impl WindowAggregator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Collect `[start, end)` for one model version.
    ///
    /// Records written after the call are not part of the snapshot.
    pub fn collect(&self, start: DateTime<Utc>, end: DateTime<Utc>, model_version: &str) -> Result<WindowSnapshot> {
        let predictions = self.db.predictions_in_window(start, end, Some(model_version))?;
        let ids: Vec<String> = predictions.iter().map(|p| p.transaction_id.clone()).collect();
        let labels = self.db.latest_ground_truth(&ids)?;

        debug!(
            model_version,
            predictions = predictions.len(),
            labels = labels.len(),
            "Collected window"
        );

        Ok(WindowSnapshot {
            start,
            end,
            model_version: model_version.to_string(),
            predictions,
            labels,
        })
    }
}

/// One baseline per numeric feature plus one for predicted probability,
/// with decile edges derived from the training records.
///
/// Features present in too few records to summarize are left out.
pub fn build_baselines(
    model_version: &str,
    records: &[PredictionRecord],
    created_at: DateTime<Utc>,
) -> Result<Vec<BaselineSummary>> {
    if records.is_empty() {
        return Err(DriftError::InsufficientData { needed: 1, got: 0 });
    }

    let names: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.features.keys().map(String::as_str))
        .collect();

    let mut baselines = Vec::with_capacity(names.len() + 1);
    for name in names {
        let values: Vec<f64> = records.iter().filter_map(|r| r.features.get(name).copied()).collect();
        match stats::summarize(&values, None) {
            Ok(summary) => baselines.push(BaselineSummary {
                feature_name: name.to_string(),
                model_version: model_version.to_string(),
                summary,
                reference: Vec::new(),
                created_at,
            }),
            Err(DriftError::InsufficientData { .. }) => {
                debug!(feature = name, "No finite training values, feature not baselined");
            }
            Err(e) => return Err(e),
        }
    }

    let probabilities: Vec<f64> = records.iter().map(|r| r.predicted_probability).collect();
    baselines.push(BaselineSummary {
        feature_name: PREDICTION_FEATURE.to_string(),
        model_version: model_version.to_string(),
        summary: stats::summarize(&probabilities, None)?,
        reference: stats::reference_sample(&probabilities, REFERENCE_SAMPLE_SIZE),
        created_at,
    });

    Ok(baselines)
}
