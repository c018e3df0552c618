//! Maximal Marginal Relevance (MMR) selection.
//!
//! ```text
//! MMR(i) = λ · rel(i) - (1 - λ) · max_{j ∈ S} sim(i, j)
//! ```
//!
//! Relevance is min-max normalized onto `[0,1]` so it is comparable with
//! similarity. Based on Carbonell & Goldberg (1998).

use strata_core::TimeBudget;

use crate::diversity::{normalize_relevance, Selection};
use crate::similarity::SimilarityMatrix;

/// Greedily pick up to `k` indices from `scores`.
///
/// Ties go to the lower index, which is the better fused rank. The budget is
/// polled before every pick after the first; on expiry the remaining slots
/// are filled by relevance and the selection is marked truncated.
pub fn mmr_select(
    scores: &[f64],
    similarity: &SimilarityMatrix,
    k: usize,
    lambda: f64,
    budget: Option<&TimeBudget>,
) -> Selection {
    let n = scores.len().min(similarity.len());
    let k = k.min(n);
    if k == 0 {
        return Selection::default();
    }

    let lambda = lambda.clamp(0.0, 1.0);
    let diversity_weight = 1.0 - lambda;
    let relevance = normalize_relevance(&scores[..n]);

    let mut selected: Vec<usize> = Vec::with_capacity(k);
    let mut remaining = vec![true; n];
    // Max similarity of each candidate to the selected set.
    let mut max_sim = vec![0.0_f64; n];

    while selected.len() < k {
        if !selected.is_empty() && budget.is_some_and(TimeBudget::expired) {
            return Selection::truncated(selected, &relevance, k);
        }

        let mut best_idx = usize::MAX;
        let mut best_mmr = f64::NEG_INFINITY;
        for i in (0..n).filter(|&i| remaining[i]) {
            let mmr = lambda * relevance[i] - diversity_weight * max_sim[i];
            if mmr > best_mmr {
                best_mmr = mmr;
                best_idx = i;
            }
        }
        if best_idx == usize::MAX {
            break;
        }

        selected.push(best_idx);
        remaining[best_idx] = false;
        for i in (0..n).filter(|&i| remaining[i]) {
            max_sim[i] = max_sim[i].max(similarity.get(i, best_idx));
        }
    }

    Selection::complete(selected)
}
