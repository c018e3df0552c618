//! Greedy MAP selection under a determinantal point process.
//!
//! Kernel `L_ij = q_i · q_j · sim(i, j)` with `ε` added on the diagonal. Each
//! step picks the item with the largest remaining conditional variance `d_i²`
//! and applies a rank-one Schur-complement update to every other item, so
//! later picks account for redundancy with everything already chosen.
//!
//! Reference: Chen, Zhang & Zhou (2018), "Fast Greedy MAP Inference for
//! Determinantal Point Process to Improve Recommendation Diversity".

use strata_core::{defaults, TimeBudget};

use crate::diversity::{normalize_relevance, Selection};
use crate::similarity::SimilarityMatrix;

/// Quality floor so zero-relevance items keep a non-degenerate kernel row.
const QUALITY_FLOOR: f64 = 0.05;

/// Conditional variance below which further picks add no diversity.
const MIN_GAIN: f64 = 1e-12;

/// Map scores to kernel qualities in `[QUALITY_FLOOR, 1]`.
pub fn qualities(scores: &[f64]) -> Vec<f64> {
    normalize_relevance(scores)
        .into_iter()
        .map(|r| QUALITY_FLOOR + (1.0 - QUALITY_FLOOR) * r)
        .collect()
}

/// Greedily pick up to `k` indices.
///
/// When the kernel is exhausted (every remaining item is redundant with the
/// selection) the rest are filled by relevance. The budget is polled between
/// picks; on expiry the selection is filled by relevance and marked truncated.
pub fn dpp_select(
    scores: &[f64],
    similarity: &SimilarityMatrix,
    k: usize,
    budget: Option<&TimeBudget>,
) -> Selection {
    let n = scores.len().min(similarity.len());
    let k = k.min(n);
    if k == 0 {
        return Selection::default();
    }

    let q = qualities(&scores[..n]);
    let relevance = normalize_relevance(&scores[..n]);
    let kernel = |i: usize, j: usize| {
        if i == j {
            q[i] * q[i] + defaults::DPP_EPSILON
        } else {
            q[i] * q[j] * similarity.get(i, j)
        }
    };

    let mut d2: Vec<f64> = (0..n).map(|i| kernel(i, i)).collect();
    let mut c: Vec<Vec<f64>> = vec![Vec::with_capacity(k); n];
    let mut remaining = vec![true; n];
    let mut selected: Vec<usize> = Vec::with_capacity(k);

    while selected.len() < k {
        if !selected.is_empty() && budget.is_some_and(TimeBudget::expired) {
            return Selection::truncated(selected, &relevance, k);
        }

        let mut best_idx = usize::MAX;
        let mut best_gain = f64::NEG_INFINITY;
        for i in (0..n).filter(|&i| remaining[i]) {
            if d2[i] > best_gain {
                best_gain = d2[i];
                best_idx = i;
            }
        }
        if best_idx == usize::MAX || best_gain <= MIN_GAIN {
            break;
        }

        let j = best_idx;
        selected.push(j);
        remaining[j] = false;

        let dj = d2[j].sqrt();
        for i in (0..n).filter(|&i| remaining[i]) {
            let dot: f64 = c[j].iter().zip(&c[i]).map(|(a, b)| a * b).sum();
            let e = (kernel(j, i) - dot) / dj;
            c[i].push(e);
            d2[i] -= e * e;
        }
    }

    if selected.len() < k {
        return Selection::filled(selected, &relevance, k);
    }
    Selection::complete(selected)
}
