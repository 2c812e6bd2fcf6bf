//! Distributional summaries for drift scoring
//!
//! Summaries are pure functions of their input: the same samples (and the
//! same edges) always produce the same summary, which keeps re-running a
//! closed window idempotent.

use crate::error::{DriftError, Result};
use crate::models::FeatureSummary;

/// Number of equal-frequency bins derived when no edges are supplied
pub const DEFAULT_BINS: usize = 10;

/// Summarize `samples`, binning onto `edges` when given, or onto
/// equal-frequency decile edges derived from the samples otherwise.
///
/// Non-finite samples are ignored. Fails with `InsufficientData` when
/// nothing is left to summarize.
pub fn summarize(samples: &[f64], edges: Option<&[f64]>) -> Result<FeatureSummary> {
    let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return Err(DriftError::InsufficientData { needed: 1, got: 0 });
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    let bin_edges = match edges {
        Some(edges) => edges.to_vec(),
        None => quantile_edges(&sorted, DEFAULT_BINS),
    };
    let bin_counts = histogram(&sorted, &bin_edges);

    Ok(FeatureSummary {
        mean,
        std: variance.sqrt(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        p25: percentile_sorted(&sorted, 0.25),
        p50: percentile_sorted(&sorted, 0.50),
        p75: percentile_sorted(&sorted, 0.75),
        bin_edges,
        bin_counts,
        sample_count: sorted.len(),
    })
}

/// Percentile of ascending `sorted` with linear interpolation between order
/// statistics (`q` in [0, 1]).
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        len => {
            let rank = q.clamp(0.0, 1.0) * (len - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let frac = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

/// Equal-frequency edges for `bins` bins over ascending `sorted`.
///
/// A value repeated across consecutive quantiles holds at least a whole bin
/// of mass, so it gets a bin of its own: a split is placed halfway to the
/// next larger sample. Only a constant input yields a single bin. Always
/// returns at least two edges.
pub fn quantile_edges(sorted: &[f64], bins: usize) -> Vec<f64> {
    let bins = bins.max(1);
    let quantiles: Vec<f64> = (0..=bins)
        .map(|i| percentile_sorted(sorted, i as f64 / bins as f64))
        .collect();

    let mut edges = quantiles.clone();
    for pair in quantiles.windows(2).filter(|w| w[0] == w[1]) {
        let tied = pair[0];
        let next = sorted.partition_point(|v| *v <= tied);
        if let Some(&above) = sorted.get(next) {
            edges.push(tied + (above - tied) / 2.0);
        }
    }
    edges.sort_by(f64::total_cmp);
    edges.dedup_by(|a, b| a == b);

    if edges.len() < 2 {
        let only = edges.first().copied().unwrap_or(0.0);
        edges = vec![only, only];
    }
    edges
}

/// Count `samples` into the bins delimited by ascending `edges`.
///
/// Bin `i` is `[edges[i], edges[i + 1])`; values below the first edge land in
/// the first bin and values at or above the last inner edge in the last bin.
pub fn histogram(samples: &[f64], edges: &[f64]) -> Vec<u64> {
    let bins = edges.len().saturating_sub(1).max(1);
    let inner = if edges.len() > 2 {
        &edges[1..edges.len() - 1]
    } else {
        &[][..]
    };

    let mut counts = vec![0u64; bins];
    for value in samples.iter().filter(|v| v.is_finite()) {
        let bin = inner.partition_point(|edge| *edge <= *value);
        counts[bin.min(bins - 1)] += 1;
    }
    counts
}

/// Deterministic stride down-sample of `values`, at most `max` entries
pub fn reference_sample(values: &[f64], max: usize) -> Vec<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() <= max || max == 0 {
        return finite;
    }
    let stride = finite.len() as f64 / max as f64;
    (0..max)
        .map(|i| finite[((i as f64 * stride) as usize).min(finite.len() - 1)])
        .collect()
}

/// Relative change of `current` against `baseline` in percent
pub fn percent_change(baseline: f64, current: f64) -> f64 {
    (current - baseline) / (baseline.abs() + 1e-10) * 100.0
}
