//! Classification metrics over matched ground truth

use crate::models::PerformanceMetrics;

/// One prediction joined with its (most recent) true label
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledPrediction {
    pub predicted_label: u8,
    pub predicted_probability: f64,
    pub actual_label: u8,
}

/// Accuracy, precision, recall, F1 and ROC AUC.
///
/// Precision/recall/F1 fall back to 0.0 when their denominator is empty.
/// AUC is `None` unless both classes are present.
pub fn compute_metrics(pairs: &[LabeledPrediction]) -> PerformanceMetrics {
    if pairs.is_empty() {
        return PerformanceMetrics::default();
    }

    let (mut tp, mut fp, mut tn, mut fn_) = (0u64, 0u64, 0u64, 0u64);
    for pair in pairs {
        match (pair.predicted_label != 0, pair.actual_label != 0) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, false) => tn += 1,
            (false, true) => fn_ += 1,
        }
    }

    let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };

    PerformanceMetrics {
        accuracy: Some(ratio(tp + tn, tp + fp + tn + fn_)),
        precision: Some(precision),
        recall: Some(recall),
        f1_score: Some(f1),
        auc_roc: roc_auc(pairs),
    }
}

/// Rank-based (Mann-Whitney) ROC AUC with averaged ranks for ties
fn roc_auc(pairs: &[LabeledPrediction]) -> Option<f64> {
    let positives = pairs.iter().filter(|p| p.actual_label != 0).count();
    let negatives = pairs.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut scored: Vec<(f64, bool)> = pairs
        .iter()
        .map(|p| (p.predicted_probability, p.actual_label != 0))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < scored.len() {
        let mut j = i;
        while j + 1 < scored.len() && scored[j + 1].0 == scored[i].0 {
            j += 1;
        }
        // Ranks are 1-based; tied block i..=j shares the average rank
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        let tied_positives = scored[i..=j].iter().filter(|(_, positive)| *positive).count();
        positive_rank_sum += avg_rank * tied_positives as f64;
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Metrics that fell more than `margin` (relative) below their training value,
/// with the size of each drop
pub fn degraded_metrics(
    current: &PerformanceMetrics,
    training: &PerformanceMetrics,
    tracked: &[String],
    margin: f64,
) -> Vec<(String, f64)> {
    tracked
        .iter()
        .filter_map(|name| {
            let now = current.get(name)?;
            let reference = training.get(name)?;
            if reference <= 0.0 {
                return None;
            }
            let drop = (reference - now) / reference;
            (drop > margin).then(|| (name.clone(), drop))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(predicted: u8, proba: f64, actual: u8) -> LabeledPrediction {
        LabeledPrediction {
            predicted_label: predicted,
            predicted_probability: proba,
            actual_label: actual,
        }
    }

    #[test]
    fn test_confusion_metrics() {
        // tp=2, fp=1, tn=3, fn=2
        let pairs = vec![
            pair(1, 0.9, 1),
            pair(1, 0.8, 1),
            pair(1, 0.7, 0),
            pair(0, 0.1, 0),
            pair(0, 0.2, 0),
            pair(0, 0.3, 0),
            pair(0, 0.4, 1),
            pair(0, 0.45, 1),
        ];
        let metrics = compute_metrics(&pairs);

        assert!((metrics.accuracy.unwrap() - 5.0 / 8.0).abs() < 1e-12);
        assert!((metrics.precision.unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.recall.unwrap() - 0.5).abs() < 1e-12);
        let f1 = 2.0 * (2.0 / 3.0) * 0.5 / (2.0 / 3.0 + 0.5);
        assert!((metrics.f1_score.unwrap() - f1).abs() < 1e-12);
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let perfect = vec![pair(0, 0.1, 0), pair(0, 0.2, 0), pair(1, 0.8, 1), pair(1, 0.9, 1)];
        assert_eq!(compute_metrics(&perfect).auc_roc, Some(1.0));

        let inverted = vec![pair(1, 0.9, 0), pair(0, 0.1, 1)];
        assert_eq!(compute_metrics(&inverted).auc_roc, Some(0.0));
    }

    #[test]
    fn test_auc_ties_count_half() {
        let tied = vec![pair(0, 0.5, 0), pair(1, 0.5, 1)];
        assert_eq!(compute_metrics(&tied).auc_roc, Some(0.5));
    }

    #[test]
    fn test_single_class_has_no_auc() {
        let pairs = vec![pair(0, 0.1, 0), pair(0, 0.3, 0)];
        let metrics = compute_metrics(&pairs);
        assert_eq!(metrics.auc_roc, None);
        assert_eq!(metrics.precision, Some(0.0));
        assert_eq!(metrics.accuracy, Some(1.0));
    }

    #[test]
    fn test_degraded_metrics_uses_relative_margin() {
        let training = PerformanceMetrics {
            accuracy: Some(0.95),
            recall: Some(0.80),
            auc_roc: Some(0.90),
            ..Default::default()
        };
        let current = PerformanceMetrics {
            accuracy: Some(0.93),  // ~2.1% drop
            recall: Some(0.70),    // 12.5% drop
            auc_roc: None,
            ..Default::default()
        };
        let tracked: Vec<String> = ["accuracy", "recall", "auc_roc", "precision"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let degraded = degraded_metrics(&current, &training, &tracked, 0.05);
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].0, "recall");
        assert!((degraded[0].1 - 0.125).abs() < 1e-9);
    }
}
