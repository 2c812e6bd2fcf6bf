//! Drift scoring
//!
//! Turns baseline/current distributions into classified report entries:
//! - PSI per tracked feature (data drift)
//! - two-sample KS on predicted probabilities plus a positive-rate margin
//!   (concept drift)
//! - classification metrics against training-time values (performance)
//!
//! Every check that lacks data is reported as unknown rather than healthy.

pub mod ks;
pub mod performance;
pub mod psi;

use tracing::debug;

use crate::config::ThresholdConfig;
use crate::error::{DriftError, Result};
use crate::models::{
    BaselineSummary, CheckStatus, FeatureDrift, HealthStatus, PerformanceCheck,
    PerformanceMetrics, PerformanceStatus, PredictionDrift, PsiSeverity,
};
use crate::stats;

pub use ks::KsResult;
pub use performance::{compute_metrics, LabeledPrediction};

/// Stateless scorer parameterised by the configured thresholds
#[derive(Debug, Clone)]
pub struct DriftScorer {
    thresholds: ThresholdConfig,
}

impl DriftScorer {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self { thresholds }
    }

    fn require_samples(&self, got: usize) -> Result<()> {
        if got < self.thresholds.min_samples {
            return Err(DriftError::InsufficientData {
                needed: self.thresholds.min_samples,
                got,
            });
        }
        Ok(())
    }

    /// PSI of `current` samples against a feature baseline, rebinned onto the
    /// baseline's edges.
    ///
    /// Either side below the minimum sample count is `InsufficientData`. A
    /// baseline with a single distinct value has one bin and no PSI, so it
    /// is reported as unknown.
    pub fn score_feature(&self, baseline: &BaselineSummary, current: &[f64]) -> Result<FeatureDrift> {
        self.require_samples(baseline.summary.sample_count)?;
        if baseline.summary.bin_counts.len() < 2 {
            return Ok(self.unscored_feature(
                baseline,
                format!(
                    "baseline holds a single distinct value ({}); PSI is undefined",
                    baseline.summary.min
                ),
            ));
        }
        let current_summary = stats::summarize(current, Some(&baseline.summary.bin_edges))?;
        self.require_samples(current_summary.sample_count)?;

        let t = &self.thresholds;
        let score = psi::psi(
            &baseline.summary.bin_counts,
            &current_summary.bin_counts,
            t.psi_epsilon,
        )?;
        let severity = psi::classify(score, t.psi_moderate, t.psi_drifted);
        let threshold = match severity {
            PsiSeverity::Moderate => t.psi_moderate,
            _ => t.psi_drifted,
        };

        debug!(
            feature = %baseline.feature_name,
            psi = score,
            severity = %severity,
            "Scored feature"
        );

        Ok(FeatureDrift {
            feature_name: baseline.feature_name.clone(),
            status: if severity == PsiSeverity::High {
                CheckStatus::Drifted
            } else {
                CheckStatus::Stable
            },
            psi: Some(score),
            severity: Some(severity),
            health: severity.health(),
            threshold,
            mean_change_pct: Some(stats::percent_change(baseline.summary.mean, current_summary.mean)),
            std_change_pct: Some(stats::percent_change(baseline.summary.std, current_summary.std)),
            baseline: baseline.summary.clone(),
            current: Some(current_summary),
            skipped_reason: None,
        })
    }

    /// Entry for a feature that could not be scored this cycle
    pub fn unknown_feature(&self, baseline: &BaselineSummary, reason: &DriftError) -> FeatureDrift {
        self.unscored_feature(baseline, reason.to_string())
    }

    fn unscored_feature(&self, baseline: &BaselineSummary, reason: String) -> FeatureDrift {
        FeatureDrift {
            feature_name: baseline.feature_name.clone(),
            status: CheckStatus::Unknown,
            psi: None,
            severity: None,
            health: HealthStatus::Unknown,
            threshold: self.thresholds.psi_drifted,
            baseline: baseline.summary.clone(),
            current: None,
            mean_change_pct: None,
            std_change_pct: None,
            skipped_reason: Some(reason),
        }
    }

    /// KS test of current predicted probabilities against the baseline's
    /// reference sample, gated by a minimum positive-rate shift.
    pub fn score_predictions(
        &self,
        baseline: &BaselineSummary,
        baseline_positive_rate: f64,
        probabilities: &[f64],
        labels: &[u8],
    ) -> Result<PredictionDrift> {
        self.require_samples(baseline.reference.len())?;
        self.require_samples(probabilities.len())?;

        let t = &self.thresholds;
        let KsResult { statistic, p_value } = ks::two_sample(&baseline.reference, probabilities)?;

        let current_positive_rate = if labels.is_empty() {
            0.0
        } else {
            labels.iter().filter(|l| **l != 0).count() as f64 / labels.len() as f64
        };
        let rate_delta = (current_positive_rate - baseline_positive_rate).abs();
        let drifted = p_value < t.ks_p_value && rate_delta > t.min_positive_rate_delta;

        debug!(
            ks_statistic = statistic,
            p_value,
            current_positive_rate,
            baseline_positive_rate,
            drifted,
            "Scored prediction distribution"
        );

        Ok(PredictionDrift {
            status: if drifted { CheckStatus::Drifted } else { CheckStatus::Stable },
            health: if drifted { HealthStatus::Warning } else { HealthStatus::Healthy },
            statistic: Some(statistic),
            p_value: Some(p_value),
            p_value_threshold: t.ks_p_value,
            baseline_positive_rate,
            current_positive_rate: Some(current_positive_rate),
            min_rate_delta: t.min_positive_rate_delta,
            change_pct: Some(stats::percent_change(baseline_positive_rate, current_positive_rate)),
            baseline_samples: baseline.reference.len(),
            current_samples: probabilities.len(),
            skipped_reason: None,
        })
    }

    /// Entry for a prediction-distribution check that could not run
    pub fn unknown_predictions(
        &self,
        baseline_positive_rate: f64,
        baseline_samples: usize,
        current_samples: usize,
        reason: &DriftError,
    ) -> PredictionDrift {
        PredictionDrift {
            status: CheckStatus::Unknown,
            health: HealthStatus::Unknown,
            statistic: None,
            p_value: None,
            p_value_threshold: self.thresholds.ks_p_value,
            baseline_positive_rate,
            current_positive_rate: None,
            min_rate_delta: self.thresholds.min_positive_rate_delta,
            change_pct: None,
            baseline_samples,
            current_samples,
            skipped_reason: Some(reason.to_string()),
        }
    }

    /// Compare matched-label metrics against the training metrics.
    ///
    /// Too few matched labels yields `Unknown`, never `Passed`. A drop beyond
    /// twice the margin is critical.
    pub fn score_performance(
        &self,
        pairs: &[LabeledPrediction],
        training: &PerformanceMetrics,
    ) -> PerformanceCheck {
        let t = &self.thresholds;

        if pairs.len() < t.min_matched_labels {
            return PerformanceCheck {
                status: PerformanceStatus::Unknown,
                health: HealthStatus::Unknown,
                matched_count: pairs.len(),
                metrics: PerformanceMetrics::default(),
                training: training.clone(),
                degraded_metrics: Vec::new(),
                worst_relative_drop: None,
                margin: t.performance_margin,
            };
        }

        let metrics = compute_metrics(pairs);
        let degraded =
            performance::degraded_metrics(&metrics, training, &t.tracked_metrics, t.performance_margin);
        let worst = degraded.iter().map(|(_, drop)| *drop).fold(None, |acc: Option<f64>, d| {
            Some(acc.map_or(d, |a| a.max(d)))
        });

        let (status, health) = match worst {
            None => (PerformanceStatus::Passed, HealthStatus::Healthy),
            Some(drop) if drop > 2.0 * t.performance_margin => {
                (PerformanceStatus::Degraded, HealthStatus::Critical)
            }
            Some(_) => (PerformanceStatus::Degraded, HealthStatus::Warning),
        };

        PerformanceCheck {
            status,
            health,
            matched_count: pairs.len(),
            metrics,
            training: training.clone(),
            degraded_metrics: degraded.into_iter().map(|(name, _)| name).collect(),
            worst_relative_drop: worst,
            margin: t.performance_margin,
        }
    }
}

/// Report-level status.
///
/// Any drifted feature, concept drift or performance drop is at least a
/// warning. Critical takes two simultaneous critical conditions: two drifted
/// features, or a drifted feature alongside degraded performance. `Unknown`
/// only if nothing was classified.
pub fn overall_status(
    features: &[FeatureDrift],
    prediction: &PredictionDrift,
    performance: &PerformanceCheck,
) -> HealthStatus {
    let drifted = features.iter().filter(|f| f.status == CheckStatus::Drifted).count();
    let degraded = usize::from(performance.status == PerformanceStatus::Degraded);
    if drifted + degraded >= 2 {
        return HealthStatus::Critical;
    }

    features
        .iter()
        .map(|f| f.health)
        .chain([prediction.health, performance.health])
        .max()
        .unwrap_or(HealthStatus::Unknown)
        .min(HealthStatus::Warning)
}

/// Operator-facing guidance for a set of feature entries
pub fn recommendation(features: &[FeatureDrift]) -> String {
    let names = |severity: PsiSeverity| -> Vec<&str> {
        features
            .iter()
            .filter(|f| f.severity == Some(severity))
            .map(|f| f.feature_name.as_str())
            .collect()
    };

    let high = names(PsiSeverity::High);
    let moderate = names(PsiSeverity::Moderate);

    if !high.is_empty() {
        format!(
            "URGENT: Significant drift detected in {} feature(s): {}. Model retraining strongly recommended. \
             Investigate data quality and feature engineering pipeline.",
            high.len(),
            high.join(", ")
        )
    } else if !moderate.is_empty() {
        format!(
            "WARNING: Moderate drift detected in {} feature(s): {}. Monitor closely and plan retraining.",
            moderate.len(),
            moderate.join(", ")
        )
    } else if features.iter().all(|f| f.status == CheckStatus::Unknown) && !features.is_empty() {
        "Insufficient data in the current window. Drift could not be assessed.".to_string()
    } else {
        "All features stable. Continue monitoring.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureSummary;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn scorer() -> DriftScorer {
        DriftScorer::new(ThresholdConfig::default())
    }

    /// Baseline of mean 100 / std 10 split into four 25% bins
    fn quartile_baseline() -> BaselineSummary {
        BaselineSummary {
            feature_name: "amount".to_string(),
            model_version: "v1".to_string(),
            summary: FeatureSummary {
                mean: 100.0,
                std: 10.0,
                min: 60.0,
                max: 140.0,
                p25: 93.26,
                p50: 100.0,
                p75: 106.74,
                bin_edges: vec![60.0, 93.26, 100.0, 106.74, 140.0],
                bin_counts: vec![250, 250, 250, 250],
                sample_count: 1000,
            },
            reference: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn prediction_baseline(reference: Vec<f64>) -> BaselineSummary {
        let summary = stats::summarize(&reference, None).unwrap();
        BaselineSummary {
            feature_name: crate::models::PREDICTION_FEATURE.to_string(),
            model_version: "v1".to_string(),
            summary,
            reference,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_all_mass_in_top_bin_is_drifted() {
        let current = vec![130.0; 1000];
        let entry = scorer().score_feature(&quartile_baseline(), &current).unwrap();

        assert_eq!(entry.current.as_ref().unwrap().bin_counts, vec![0, 0, 0, 1000]);
        assert!(entry.psi.unwrap() > 1.0);
        assert_eq!(entry.severity, Some(PsiSeverity::High));
        assert_eq!(entry.status, CheckStatus::Drifted);
        assert_eq!(entry.health, HealthStatus::Critical);
        assert!((entry.mean_change_pct.unwrap() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_matching_window_is_stable() {
        let mut current = Vec::new();
        for value in [80.0, 96.0, 103.0, 120.0] {
            current.extend(std::iter::repeat(value).take(100));
        }
        let entry = scorer().score_feature(&quartile_baseline(), &current).unwrap();
        assert!(entry.psi.unwrap().abs() < 1e-12);
        assert_eq!(entry.severity, Some(PsiSeverity::None));
        assert_eq!(entry.health, HealthStatus::Healthy);
    }

    #[test]
    fn test_empty_window_is_insufficient() {
        let err = scorer().score_feature(&quartile_baseline(), &[]).unwrap_err();
        assert!(matches!(err, DriftError::InsufficientData { .. }));

        let entry = scorer().unknown_feature(&quartile_baseline(), &err);
        assert_eq!(entry.status, CheckStatus::Unknown);
        assert_eq!(entry.health, HealthStatus::Unknown);
        assert!(entry.skipped_reason.is_some());
    }

    #[test]
    fn test_small_window_is_insufficient() {
        let err = scorer()
            .score_feature(&quartile_baseline(), &[100.0; 29])
            .unwrap_err();
        assert!(matches!(err, DriftError::InsufficientData { needed: 30, got: 29 }));
    }

    #[test]
    fn test_small_baseline_is_insufficient() {
        let mut baseline = quartile_baseline();
        baseline.summary.sample_count = 10;
        baseline.summary.bin_counts = vec![3, 2, 3, 2];
        let err = scorer().score_feature(&baseline, &[100.0; 500]).unwrap_err();
        assert!(matches!(err, DriftError::InsufficientData { got: 10, .. }));
    }

    #[test]
    fn test_concept_drift_needs_both_significance_and_margin() {
        let mut rng = StdRng::seed_from_u64(11);
        let reference: Vec<f64> = (0..2000).map(|_| rng.gen::<f64>() * 0.1).collect();
        let baseline = prediction_baseline(reference);

        // Probabilities shifted up, and 20% predicted positive against a 2% baseline
        let probs: Vec<f64> = (0..1000).map(|_| 0.3 + rng.gen::<f64>() * 0.5).collect();
        let labels: Vec<u8> = (0..1000).map(|i| u8::from(i % 5 == 0)).collect();
        let entry = scorer().score_predictions(&baseline, 0.02, &probs, &labels).unwrap();
        assert_eq!(entry.status, CheckStatus::Drifted);
        assert_eq!(entry.health, HealthStatus::Warning);

        // Same shift in probabilities but the positive rate barely moved
        let quiet: Vec<u8> = (0..1000).map(|i| u8::from(i % 50 == 0)).collect();
        let entry = scorer().score_predictions(&baseline, 0.02, &probs, &quiet).unwrap();
        assert!(entry.p_value.unwrap() < 0.05);
        assert_eq!(entry.status, CheckStatus::Stable);
    }

    #[test]
    fn test_concept_drift_without_reference_is_insufficient() {
        let baseline = prediction_baseline(vec![0.1; 5]);
        let err = scorer()
            .score_predictions(&baseline, 0.02, &[0.5; 100], &[1; 100])
            .unwrap_err();
        assert!(matches!(err, DriftError::InsufficientData { got: 5, .. }));
    }

    fn labeled(n: usize, correct_every: usize) -> Vec<LabeledPrediction> {
        (0..n)
            .map(|i| {
                let actual = u8::from(i % 2 == 0);
                let predicted = if i % correct_every == 0 { 1 - actual } else { actual };
                LabeledPrediction {
                    predicted_label: predicted,
                    predicted_probability: if predicted == 1 { 0.9 } else { 0.1 },
                    actual_label: actual,
                }
            })
            .collect()
    }

    #[test]
    fn test_performance_unknown_when_few_labels() {
        let check = scorer().score_performance(&labeled(10, 3), &PerformanceMetrics::default());
        assert_eq!(check.status, PerformanceStatus::Unknown);
        assert_eq!(check.health, HealthStatus::Unknown);
        assert_eq!(check.matched_count, 10);
    }

    #[test]
    fn test_performance_degradation_levels() {
        let training = PerformanceMetrics {
            accuracy: Some(0.95),
            ..Default::default()
        };

        // Every 10th wrong: accuracy 0.9, a 5.3% drop
        let check = scorer().score_performance(&labeled(100, 10), &training);
        assert_eq!(check.status, PerformanceStatus::Degraded);
        assert_eq!(check.health, HealthStatus::Warning);
        assert_eq!(check.degraded_metrics, vec!["accuracy".to_string()]);

        // Every 4th wrong: accuracy 0.75, a 21% drop
        let check = scorer().score_performance(&labeled(100, 4), &training);
        assert_eq!(check.health, HealthStatus::Critical);

        // Perfect predictions pass
        let check = scorer().score_performance(&labeled(100, 1000), &training);
        assert_eq!(check.status, PerformanceStatus::Passed);
    }

    #[test]
    fn test_overall_status_needs_two_critical_conditions() {
        let s = scorer();
        let baseline = quartile_baseline();
        let drifted = s.score_feature(&baseline, &vec![130.0; 100]).unwrap();
        let mut second = drifted.clone();
        second.feature_name = "hour".to_string();
        let stable = s.score_feature(&baseline, &[80.0, 96.0, 103.0, 120.0].repeat(25)).unwrap();
        let unknown = s.unknown_feature(&baseline, &DriftError::InsufficientData { needed: 30, got: 0 });
        let prediction = s.unknown_predictions(0.02, 0, 0, &DriftError::InsufficientData { needed: 30, got: 0 });
        let no_labels = s.score_performance(&[], &PerformanceMetrics::default());
        let training = PerformanceMetrics {
            accuracy: Some(0.95),
            ..Default::default()
        };
        let collapsed = s.score_performance(&labeled(100, 4), &training);
        assert_eq!(collapsed.health, HealthStatus::Critical);

        assert_eq!(
            overall_status(&[unknown.clone()], &prediction, &no_labels),
            HealthStatus::Unknown
        );
        assert_eq!(
            overall_status(&[unknown, stable.clone()], &prediction, &no_labels),
            HealthStatus::Healthy
        );

        // A single critical condition is a warning
        assert_eq!(
            overall_status(&[stable.clone(), drifted.clone()], &prediction, &no_labels),
            HealthStatus::Warning
        );
        assert_eq!(
            overall_status(&[stable], &prediction, &collapsed),
            HealthStatus::Warning
        );

        // Two at once are critical
        assert_eq!(
            overall_status(&[drifted.clone(), second], &prediction, &no_labels),
            HealthStatus::Critical
        );
        assert_eq!(
            overall_status(&[drifted], &prediction, &collapsed),
            HealthStatus::Critical
        );
    }

    #[test]
    fn test_binary_feature_shift_is_drifted() {
        // 95/5 training split against a 50/50 window
        let mut training = vec![0.0; 950];
        training.extend(std::iter::repeat(1.0).take(50));
        let baseline = BaselineSummary {
            feature_name: "is_international".to_string(),
            model_version: "v1".to_string(),
            summary: stats::summarize(&training, None).unwrap(),
            reference: Vec::new(),
            created_at: Utc::now(),
        };

        let current = [0.0, 1.0].repeat(500);
        let entry = scorer().score_feature(&baseline, &current).unwrap();
        assert_eq!(entry.current.as_ref().unwrap().bin_counts, vec![500, 500]);
        assert!(entry.psi.unwrap() > 1.0);
        assert_eq!(entry.status, CheckStatus::Drifted);

        // The training split itself stays stable
        let entry = scorer().score_feature(&baseline, &training).unwrap();
        assert!(entry.psi.unwrap().abs() < 1e-12);
        assert_eq!(entry.status, CheckStatus::Stable);
    }

    #[test]
    fn test_constant_baseline_is_unknown() {
        let baseline = BaselineSummary {
            feature_name: "channel".to_string(),
            model_version: "v1".to_string(),
            summary: stats::summarize(&[3.0; 200], None).unwrap(),
            reference: Vec::new(),
            created_at: Utc::now(),
        };

        let entry = scorer().score_feature(&baseline, &[7.0; 200]).unwrap();
        assert_eq!(entry.status, CheckStatus::Unknown);
        assert_eq!(entry.health, HealthStatus::Unknown);
        assert!(entry.psi.is_none());
        assert!(entry.skipped_reason.unwrap().contains("single distinct value"));
    }

    #[test]
    fn test_recommendation_text() {
        let s = scorer();
        let drifted = s.score_feature(&quartile_baseline(), &vec![130.0; 100]).unwrap();
        assert!(recommendation(&[drifted]).starts_with("URGENT"));
        assert_eq!(recommendation(&[]), "All features stable. Continue monitoring.");
    }
}
