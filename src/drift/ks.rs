//! Two-sample Kolmogorov-Smirnov test

use crate::error::{DriftError, Result};

/// Result of a two-sample KS test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KsResult {
    /// Largest absolute gap between the two empirical CDFs, in [0, 1]
    pub statistic: f64,
    /// Asymptotic p-value for the null of equal distributions
    pub p_value: f64,
}

/// Two-sample KS test over the pooled, sorted samples.
///
/// Non-finite values are dropped; either side ending up empty is
/// `InsufficientData`.
pub fn two_sample(baseline: &[f64], current: &[f64]) -> Result<KsResult> {
    let a = sorted_finite(baseline);
    let b = sorted_finite(current);
    if a.is_empty() || b.is_empty() {
        return Err(DriftError::InsufficientData {
            needed: 1,
            got: a.len().min(b.len()),
        });
    }

    let statistic = statistic_sorted(&a, &b);
    let p_value = asymptotic_p_value(statistic, a.len(), b.len());
    Ok(KsResult { statistic, p_value })
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    out.sort_by(|x, y| x.total_cmp(y));
    out
}

/// KS statistic for two ascending, non-empty samples.
///
/// Ties are consumed on both sides before the CDFs are compared, so equal
/// samples give exactly zero.
fn statistic_sorted(a: &[f64], b: &[f64]) -> f64 {
    let (n, m) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;

    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n - j as f64 / m).abs());
    }

    d
}

/// Asymptotic p-value from the Kolmogorov distribution with the usual
/// small-sample correction on the effective size.
pub fn asymptotic_p_value(statistic: f64, n: usize, m: usize) -> f64 {
    let en = ((n * m) as f64 / (n + m) as f64).sqrt();
    let lambda = (en + 0.12 + 0.11 / en) * statistic;
    kolmogorov_q(lambda)
}

/// Survival function of the Kolmogorov distribution,
/// `2 * sum_{j>=1} (-1)^(j-1) exp(-2 j^2 lambda^2)`.
fn kolmogorov_q(lambda: f64) -> f64 {
    const EPS_TERM: f64 = 1e-3;
    const EPS_SUM: f64 = 1e-8;

    if lambda <= 0.0 {
        return 1.0;
    }

    let a2 = -2.0 * lambda * lambda;
    let mut fac = 2.0;
    let mut sum = 0.0;
    let mut previous = 0.0;

    for j in 1..=100 {
        let jf = j as f64;
        let term = fac * (a2 * jf * jf).exp();
        sum += term;
        if term.abs() <= EPS_TERM * previous || term.abs() <= EPS_SUM * sum {
            return sum.clamp(0.0, 1.0);
        }
        fac = -fac;
        previous = term.abs();
    }

    // Series failed to converge: lambda is tiny, the distributions are indistinguishable
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_identical_samples() {
        let samples: Vec<f64> = (0..200).map(|v| (v % 17) as f64 / 17.0).collect();
        let result = two_sample(&samples, &samples).unwrap();
        assert_eq!(result.statistic, 0.0);
        assert_eq!(result.p_value, 1.0);
    }

    #[test]
    fn test_disjoint_supports() {
        let low: Vec<f64> = (0..100).map(|v| v as f64 / 1000.0).collect();
        let high: Vec<f64> = (0..150).map(|v| 1.0 + v as f64).collect();
        let result = two_sample(&low, &high).unwrap();
        assert_eq!(result.statistic, 1.0);
        assert!(result.p_value < 1e-10);

        let swapped = two_sample(&high, &low).unwrap();
        assert_eq!(swapped.statistic, 1.0);
    }

    #[test]
    fn test_statistic_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let a: Vec<f64> = (0..rng.gen_range(1..80)).map(|_| rng.gen::<f64>()).collect();
            let b: Vec<f64> = (0..rng.gen_range(1..80)).map(|_| rng.gen::<f64>() * 1.5).collect();
            let result = two_sample(&a, &b).unwrap();
            assert!((0.0..=1.0).contains(&result.statistic));
            assert!((0.0..=1.0).contains(&result.p_value));
        }
    }

    #[test]
    fn test_known_half_overlap() {
        // a = {1,2,3,4}, b = {3,4,5,6}: CDF gap peaks at 0.5 between 2 and 3
        let result = two_sample(&[1.0, 2.0, 3.0, 4.0], &[3.0, 4.0, 5.0, 6.0]).unwrap();
        assert!((result.statistic - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_shift_is_significant_on_large_samples() {
        let mut rng = StdRng::seed_from_u64(42);
        let baseline: Vec<f64> = (0..2000).map(|_| rng.gen::<f64>() * 0.2).collect();
        let same: Vec<f64> = (0..2000).map(|_| rng.gen::<f64>() * 0.2).collect();
        let shifted: Vec<f64> = (0..2000).map(|_| 0.1 + rng.gen::<f64>() * 0.2).collect();

        assert!(two_sample(&baseline, &same).unwrap().p_value > 0.001);
        assert!(two_sample(&baseline, &shifted).unwrap().p_value < 1e-6);
    }

    #[test]
    fn test_empty_side_is_insufficient() {
        assert!(matches!(
            two_sample(&[], &[1.0]),
            Err(DriftError::InsufficientData { .. })
        ));
    }
}
