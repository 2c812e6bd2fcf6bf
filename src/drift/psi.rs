//! Population Stability Index

use crate::error::{DriftError, Result};
use crate::models::PsiSeverity;

/// PSI between two histograms over the same bins.
///
/// Proportions of zero are floored at `epsilon` so every term stays finite.
/// Each term `(p_c - p_b) * ln(p_c / p_b)` is non-negative, so the sum is too,
/// and it does not depend on bin order.
pub fn psi(baseline_counts: &[u64], current_counts: &[u64], epsilon: f64) -> Result<f64> {
    if baseline_counts.len() != current_counts.len() {
        return Err(DriftError::InvalidConfiguration(format!(
            "histograms disagree on bin count: {} vs {}",
            baseline_counts.len(),
            current_counts.len()
        )));
    }

    let baseline_total: u64 = baseline_counts.iter().sum();
    let current_total: u64 = current_counts.iter().sum();
    if baseline_total == 0 || current_total == 0 {
        return Err(DriftError::InsufficientData {
            needed: 1,
            got: baseline_total.min(current_total) as usize,
        });
    }

    let score = baseline_counts
        .iter()
        .zip(current_counts)
        .map(|(&b, &c)| {
            let p_b = (b as f64 / baseline_total as f64).max(epsilon);
            let p_c = (c as f64 / current_total as f64).max(epsilon);
            (p_c - p_b) * (p_c / p_b).ln()
        })
        .sum();

    Ok(score)
}

/// Map a PSI score onto the severity ladder
pub fn classify(score: f64, moderate: f64, drifted: f64) -> PsiSeverity {
    if score >= drifted {
        PsiSeverity::High
    } else if score >= moderate {
        PsiSeverity::Moderate
    } else {
        PsiSeverity::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-4;

    #[test]
    fn test_identical_is_zero() {
        let counts = [25, 25, 25, 25];
        assert_eq!(psi(&counts, &counts, EPS).unwrap(), 0.0);

        // Same proportions at different totals
        assert!(psi(&[10, 30, 60], &[100, 300, 600], EPS).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_non_negative_and_order_invariant() {
        let baseline = [120u64, 80, 40, 10, 0, 5];
        let current = [30u64, 50, 90, 60, 20, 0];
        let forward = psi(&baseline, &current, EPS).unwrap();
        assert!(forward > 0.0);

        let mut b_rev = baseline;
        let mut c_rev = current;
        b_rev.reverse();
        c_rev.reverse();
        let reversed = psi(&b_rev, &c_rev, EPS).unwrap();
        assert!((forward - reversed).abs() < 1e-12);
    }

    #[test]
    fn test_mass_moved_to_top_bin() {
        // Baseline split evenly over four bins, current entirely in the top bin
        let score = psi(&[250, 250, 250, 250], &[0, 0, 0, 1000], EPS).unwrap();
        let expected = 3.0 * (EPS - 0.25) * (EPS / 0.25).ln() + 0.75 * (1.0f64 / 0.25).ln();
        assert!((score - expected).abs() < 1e-9);
        assert!(score > 1.0);
        assert_eq!(classify(score, 0.1, 0.25), PsiSeverity::High);
    }

    #[test]
    fn test_empty_side_is_insufficient() {
        assert!(matches!(
            psi(&[0, 0], &[1, 2], EPS),
            Err(DriftError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_mismatched_bins_rejected() {
        assert!(psi(&[1, 2, 3], &[1, 2], EPS).is_err());
    }

    #[test]
    fn test_classify_ladder() {
        assert_eq!(classify(0.05, 0.1, 0.25), PsiSeverity::None);
        assert_eq!(classify(0.1, 0.1, 0.25), PsiSeverity::Moderate);
        assert_eq!(classify(0.2499, 0.1, 0.25), PsiSeverity::Moderate);
        assert_eq!(classify(0.25, 0.1, 0.25), PsiSeverity::High);
    }
}
