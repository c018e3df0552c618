//! Weighted Reciprocal Rank Fusion (RRF).
//!
//! Each branch contributes `w_s / (k + r)` for an item at 1-based rank `r`;
//! contributions for the same id across branches sum. Only rank positions
//! matter, so RRF needs no score calibration to combine heterogeneous
//! sources.
//!
//! Reference: Cormack et al. (2009)

/// Contribution of one hit at 1-based `rank` in a branch with `weight`.
#[inline]
pub fn rrf_contribution(weight: f64, k: f64, rank: usize) -> f64 {
    weight / (k + rank as f64)
}

/// Highest attainable fused score: rank 1 in every branch.
///
/// Used to normalize weighted RRF onto `[0,1]`.
pub fn max_rrf_score(weights: &[f64], k: f64) -> f64 {
    weights.iter().map(|w| rrf_contribution(*w, k, 1)).sum()
}

/// Normalize an RRF score by the maximum attainable score.
pub fn normalize_rrf(score: f64, max_possible: f64) -> f64 {
    if max_possible > 0.0 {
        (score / max_possible).min(1.0)
    } else {
        0.0
    }
}

/// Sum contributions for each present branch.
///
/// `ranks[i]` is the item's rank in branch `i`, or `None` when absent.
/// Branches are summed in index order so results are reproducible.
pub fn weighted_rrf(ranks: &[Option<usize>], weights: &[f64], k: f64) -> f64 {
    ranks
        .iter()
        .zip(weights)
        .filter_map(|(rank, w)| rank.map(|r| rrf_contribution(*w, k, r)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contribution_matches_formula() {
        assert_eq!(rrf_contribution(1.0, 60.0, 1), 1.0 / 61.0);
        assert_eq!(rrf_contribution(0.5, 60.0, 2), 0.5 / 62.0);
    }

    #[test]
    fn test_weighted_rrf_sums_present_branches() {
        let score = weighted_rrf(&[Some(2), Some(1), None], &[1.0, 1.0, 3.0], 60.0);
        assert_eq!(score, 1.0 / 62.0 + 1.0 / 61.0);
    }

    #[test]
    fn test_weighted_rrf_absent_everywhere_is_zero() {
        assert_eq!(weighted_rrf(&[None, None], &[1.0, 1.0], 60.0), 0.0);
    }

    #[test]
    fn test_normalization_top_everywhere_is_one() {
        let weights = [1.0, 2.0];
        let max = max_rrf_score(&weights, 60.0);
        let top = weighted_rrf(&[Some(1), Some(1)], &weights, 60.0);
        assert!((normalize_rrf(top, max) - 1.0).abs() < 1e-12);
        assert!(normalize_rrf(1.0 / 62.0, max) < 1.0);
    }

    #[test]
    fn test_normalization_with_zero_weights() {
        assert_eq!(normalize_rrf(0.3, max_rrf_score(&[0.0, 0.0], 60.0)), 0.0);
    }

    #[test]
    fn test_lower_k_emphasizes_top_ranks() {
        let gap_k20 = rrf_contribution(1.0, 20.0, 1) - rrf_contribution(1.0, 20.0, 5);
        let gap_k60 = rrf_contribution(1.0, 60.0, 1) - rrf_contribution(1.0, 60.0, 5);
        assert!(gap_k20 > gap_k60);
    }
}
