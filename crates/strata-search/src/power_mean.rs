//! Weighted power (generalized) mean of `[0,1]` scores.
//!
//! `M_p = (Σ w_i x_i^p)^(1/p)` with weights renormalized to sum to one.
//! `p = 1` is the arithmetic mean, `p → 0` the geometric mean (computed in the
//! log domain), large positive `p` approaches the max and large negative `p`
//! the min. Evaluated with a log-sum-exp so extreme exponents stay finite.

/// Lower clamp for inputs so logarithms and negative powers stay defined.
pub const POWER_MEAN_EPSILON: f64 = 1e-9;

/// Exponents closer to zero than this use the geometric limit.
const GEOMETRIC_THRESHOLD: f64 = 1e-9;

/// Weighted power mean of `values` (clamped into `[ε, 1]`).
///
/// Pairs with non-positive or non-finite weight are ignored. Returns `0.0`
/// when nothing carries weight.
pub fn weighted_power_mean(values: &[f64], weights: &[f64], p: f64) -> f64 {
    let pairs: Vec<(f64, f64)> = values
        .iter()
        .zip(weights)
        .filter(|(_, w)| w.is_finite() && **w > 0.0)
        .map(|(x, w)| {
            let x = if x.is_finite() { *x } else { 0.0 };
            (x.clamp(POWER_MEAN_EPSILON, 1.0), *w)
        })
        .collect();

    let total_weight: f64 = pairs.iter().map(|(_, w)| w).sum();
    if pairs.is_empty() || total_weight <= 0.0 {
        return 0.0;
    }

    let result = if p.abs() < GEOMETRIC_THRESHOLD {
        let log_mean: f64 = pairs
            .iter()
            .map(|(x, w)| (w / total_weight) * x.ln())
            .sum();
        log_mean.exp()
    } else {
        // log Σ w_i exp(p ln x_i), shifted by the max term.
        let terms: Vec<(f64, f64)> = pairs
            .iter()
            .map(|(x, w)| (p * x.ln(), w / total_weight))
            .collect();
        let max = terms
            .iter()
            .map(|(t, _)| *t)
            .fold(f64::NEG_INFINITY, f64::max);
        let sum: f64 = terms.iter().map(|(t, w)| w * (t - max).exp()).sum();
        ((max + sum.ln()) / p).exp()
    };

    if result.is_finite() {
        result.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p_one_is_weighted_arithmetic_mean() {
        let m = weighted_power_mean(&[0.2, 0.8], &[1.0, 3.0], 1.0);
        assert!((m - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_p_zero_is_geometric_mean() {
        let m = weighted_power_mean(&[0.25, 1.0], &[1.0, 1.0], 0.0);
        assert!((m - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_near_zero_p_approaches_geometric() {
        let geo = weighted_power_mean(&[0.25, 1.0], &[1.0, 1.0], 0.0);
        let near = weighted_power_mean(&[0.25, 1.0], &[1.0, 1.0], 1e-4);
        assert!((geo - near).abs() < 1e-3);
    }

    #[test]
    fn test_large_p_approaches_max_and_negative_p_min() {
        let hi = weighted_power_mean(&[0.1, 0.9], &[1.0, 1.0], 200.0);
        let lo = weighted_power_mean(&[0.1, 0.9], &[1.0, 1.0], -200.0);
        assert!((hi - 0.9).abs() < 0.01, "{hi}");
        assert!((lo - 0.1).abs() < 0.01, "{lo}");
    }

    #[test]
    fn test_harmonic_mean_with_negative_one() {
        let m = weighted_power_mean(&[0.5, 0.25], &[1.0, 1.0], -1.0);
        assert!((m - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weights_and_empty_input() {
        assert_eq!(weighted_power_mean(&[], &[], 1.0), 0.0);
        assert_eq!(weighted_power_mean(&[0.5], &[0.0], 1.0), 0.0);
    }

    #[test]
    fn test_non_finite_values_are_treated_as_zero() {
        let m = weighted_power_mean(&[f64::NAN, 1.0], &[1.0, 1.0], 1.0);
        assert!((m - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_output_stays_in_unit_interval() {
        for p in [-50.0, -1.0, 0.0, 0.5, 1.0, 3.0, 50.0] {
            let m = weighted_power_mean(&[0.0, 1.0, 0.3], &[1.0, 2.0, 0.5], p);
            assert!((0.0..=1.0).contains(&m), "p={p} m={m}");
        }
    }
}
