//! Tail-risk (CVaR) adjustment for fused scores.
//!
//! A candidate that is strong in one branch and absent or weak in the others
//! has a low conditional value at risk: the mean of its worst `α`-fraction of
//! per-branch scores. Blending that into the base score penalizes uneven
//! cross-source support.

/// Mean of the worst `ceil(α·n)` values (at least one).
///
/// Returns `0.0` for an empty slice. Non-finite values count as `0.0`.
pub fn cvar(values: &[f64], alpha: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values
        .iter()
        .map(|v| if v.is_finite() { *v } else { 0.0 })
        .collect();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let count = ((alpha.clamp(0.0, 1.0) * n as f64).ceil() as usize).clamp(1, n);
    sorted[..count].iter().sum::<f64>() / count as f64
}

/// `(1-λ)·base + λ·cvar`.
pub fn blend_tail_risk(base: f64, cvar: f64, lambda: f64) -> f64 {
    let lambda = lambda.clamp(0.0, 1.0);
    (1.0 - lambda) * base + lambda * cvar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cvar_takes_single_worst_for_small_alpha() {
        assert_eq!(cvar(&[0.9, 0.1, 0.5], 0.10), 0.1);
    }

    #[test]
    fn test_cvar_averages_worst_fraction() {
        // ceil(0.5 * 4) = 2 worst values: 0.2, 0.4
        let v = cvar(&[0.8, 0.2, 0.4, 1.0], 0.5);
        assert!((v - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_cvar_full_alpha_is_mean() {
        let v = cvar(&[0.2, 0.4, 0.6], 1.0);
        assert!((v - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_cvar_empty_is_zero() {
        assert_eq!(cvar(&[], 0.1), 0.0);
    }

    #[test]
    fn test_blend_penalizes_uneven_support() {
        let even = blend_tail_risk(0.6, cvar(&[0.6, 0.6], 0.1), 0.25);
        let uneven = blend_tail_risk(0.6, cvar(&[1.0, 0.0], 0.1), 0.25);
        assert!(even > uneven);
        assert!((uneven - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_blend_lambda_bounds() {
        assert_eq!(blend_tail_risk(0.8, 0.2, 0.0), 0.8);
        assert_eq!(blend_tail_risk(0.8, 0.2, 1.0), 0.2);
        assert_eq!(blend_tail_risk(0.8, 0.2, 5.0), 0.2);
    }
}
