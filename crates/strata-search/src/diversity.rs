//! Diversity selection over reranked (or fused) candidates.
//!
//! Dispatches to [`crate::mmr`] or [`crate::dpp`] according to the plan, or
//! plain top-k. Similarity comes from a precomputed [`SimilarityMatrix`]
//! aligned with the input order; the chosen list is re-ranked 1..n.

use tracing::{debug, warn};

use strata_core::{
    assign_ranks, DiversityMethod, DiversitySettings, FusedCandidate, Scored, TimeBudget,
};

use crate::dpp::dpp_select;
use crate::fusion::score_desc;
use crate::mmr::mmr_select;
use crate::similarity::SimilarityMatrix;

/// Min-max normalize scores onto `[0,1]`; all-equal input maps to `1.0`.
pub fn normalize_relevance(scores: &[f64]) -> Vec<f64> {
    let finite = |s: f64| if s.is_finite() { s } else { 0.0 };
    let (min, max) = scores
        .iter()
        .map(|s| finite(*s))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(mn, mx), s| {
            (mn.min(s), mx.max(s))
        });
    let range = max - min;
    scores
        .iter()
        .map(|s| {
            if range < f64::EPSILON {
                1.0
            } else {
                (finite(*s) - min) / range
            }
        })
        .collect()
}

/// Indices chosen by a selector, in selection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub indices: Vec<usize>,
    /// The budget expired mid-selection and the tail was filled by relevance.
    pub truncated: bool,
}

impl Selection {
    pub fn complete(indices: Vec<usize>) -> Self {
        Self {
            indices,
            truncated: false,
        }
    }

    /// Fill `selected` up to `k` with the most relevant unselected items.
    pub fn filled(selected: Vec<usize>, relevance: &[f64], k: usize) -> Self {
        Self::complete(fill_by_relevance(selected, relevance, k))
    }

    /// Like [`Selection::filled`], marked as cut short by the budget.
    pub fn truncated(selected: Vec<usize>, relevance: &[f64], k: usize) -> Self {
        Self {
            indices: fill_by_relevance(selected, relevance, k),
            truncated: true,
        }
    }
}

fn fill_by_relevance(mut selected: Vec<usize>, relevance: &[f64], k: usize) -> Vec<usize> {
    let mut rest: Vec<usize> = (0..relevance.len())
        .filter(|i| !selected.contains(i))
        .collect();
    rest.sort_by(|&a, &b| score_desc(relevance[a], relevance[b]).then(a.cmp(&b)));
    let missing = k.saturating_sub(selected.len());
    selected.extend(rest.into_iter().take(missing));
    selected
}

/// Top-k by score; ties keep input order.
pub fn top_k_select(scores: &[f64], k: usize) -> Selection {
    Selection::filled(Vec::new(), scores, k.min(scores.len()))
}

/// Plan-configured diversity selector.
#[derive(Debug, Clone, Copy)]
pub struct DiversitySelector {
    settings: DiversitySettings,
}

impl DiversitySelector {
    pub fn new(settings: DiversitySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &DiversitySettings {
        &self.settings
    }

    /// Choose up to `output_k` indices of `items`.
    ///
    /// A similarity matrix that does not match `items` degrades to top-k.
    pub fn select(
        &self,
        items: &[FusedCandidate],
        similarity: &SimilarityMatrix,
        budget: Option<&TimeBudget>,
    ) -> Selection {
        let scores = fused_relevance(items);
        let k = self.settings.output_k;

        let method = if similarity.len() != items.len() && self.settings.method != DiversityMethod::TopK {
            warn!(
                items = items.len(),
                matrix = similarity.len(),
                "Similarity matrix does not match candidates, using top-k"
            );
            DiversityMethod::TopK
        } else {
            self.settings.method
        };

        let selection = match method {
            DiversityMethod::Mmr => mmr_select(&scores, similarity, k, self.settings.lambda, budget),
            DiversityMethod::Dpp => dpp_select(&scores, similarity, k, budget),
            DiversityMethod::TopK => top_k_select(&scores, k),
        };

        debug!(
            method = ?method,
            input = items.len(),
            result_count = selection.indices.len(),
            truncated = selection.truncated,
            "Diversity selection complete"
        );

        selection
    }

    /// Return the chosen items in selection order, `fused_rank` rewritten
    /// to the 1-based selection position.
    pub fn apply(
        &self,
        items: &[FusedCandidate],
        similarity: &SimilarityMatrix,
        budget: Option<&TimeBudget>,
    ) -> (Vec<FusedCandidate>, bool) {
        let selection = self.select(items, similarity, budget);
        let mut chosen: Vec<FusedCandidate> = selection
            .indices
            .iter()
            .map(|&i| items[i].clone())
            .collect();
        assign_ranks(&mut chosen);
        (chosen, selection.truncated)
    }
}

/// Relevance for a reranked list whose tail was left unscored.
///
/// Cross-encoder scores and fused scores live on different scales, so the
/// unscored tail is placed below the lowest rerank score, one mean head step
/// apart per position. Lists with no rerank scores use `fused_score` as is.
fn fused_relevance(items: &[FusedCandidate]) -> Vec<f64> {
    let head: Vec<f64> = items.iter().filter_map(|c| c.rerank_score).collect();
    if head.is_empty() || head.len() == items.len() {
        return items.iter().map(Scored::score).collect();
    }

    let max = head.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = head.iter().copied().fold(f64::INFINITY, f64::min);
    let step = if max > min { (max - min) / head.len() as f64 } else { 1.0 };

    let mut below = 0.0;
    items
        .iter()
        .map(|c| match c.rerank_score {
            Some(score) => score,
            None => {
                below += 1.0;
                min - below * step
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Candidate;

    fn fused(id: &str, rank: usize, score: f64, title: &str) -> FusedCandidate {
        FusedCandidate {
            candidate: Candidate::new(id, "web", rank, score).with_title(title),
            fused_score: score,
            fused_rank: rank,
            rerank_score: None,
            sources: vec!["web".to_string()],
            min_source_rank: rank,
        }
    }

    fn matrix(items: &[FusedCandidate]) -> SimilarityMatrix {
        SimilarityMatrix::build(items.iter().map(|c| &c.candidate))
    }

    fn pool() -> Vec<FusedCandidate> {
        vec![
            fused("a", 1, 0.9, "rust async runtime tokio"),
            fused("b", 2, 0.89, "rust async runtime tokio"),
            fused("c", 3, 0.7, "borrow checker lifetimes"),
            fused("d", 4, 0.4, "cargo workspaces"),
        ]
    }

    #[test]
    fn test_normalize_relevance() {
        assert_eq!(normalize_relevance(&[1.0, 3.0, 2.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(normalize_relevance(&[0.4, 0.4]), vec![1.0, 1.0]);
        assert!(normalize_relevance(&[]).is_empty());
    }

    #[test]
    fn test_top_k_select_stable() {
        let sel = top_k_select(&[0.5, 0.9, 0.5, 0.1], 3);
        assert_eq!(sel.indices, vec![1, 0, 2]);
    }

    #[test]
    fn test_selector_mmr_avoids_lexical_duplicate() {
        let items = pool();
        let sim = matrix(&items);
        let selector = DiversitySelector::new(DiversitySettings {
            output_k: 2,
            ..Default::default()
        });
        let (chosen, truncated) = selector.apply(&items, &sim, None);
        let ids: Vec<&str> = chosen.iter().map(|c| c.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(!truncated);
    }

    #[test]
    fn test_selector_dpp_avoids_lexical_duplicate() {
        let items = pool();
        let sim = matrix(&items);
        let selector = DiversitySelector::new(DiversitySettings {
            method: DiversityMethod::Dpp,
            output_k: 2,
            ..Default::default()
        });
        let selection = selector.select(&items, &sim, None);
        assert_eq!(selection.indices, vec![0, 2]);
    }

    #[test]
    fn test_selector_top_k_ignores_similarity() {
        let items = pool();
        let sim = matrix(&items);
        let selector = DiversitySelector::new(DiversitySettings {
            method: DiversityMethod::TopK,
            output_k: 2,
            ..Default::default()
        });
        assert_eq!(selector.select(&items, &sim, None).indices, vec![0, 1]);
    }

    #[test]
    fn test_selector_mismatched_matrix_degrades_to_top_k() {
        let items = pool();
        let sim = matrix(&items[..2]);
        let selector = DiversitySelector::new(DiversitySettings {
            output_k: 3,
            ..Default::default()
        });
        assert_eq!(selector.select(&items, &sim, None).indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_selector_k_bounds() {
        let items = pool();
        let sim = matrix(&items);
        for method in [DiversityMethod::Mmr, DiversityMethod::Dpp, DiversityMethod::TopK] {
            let one = DiversitySelector::new(DiversitySettings {
                method,
                output_k: 1,
                ..Default::default()
            });
            assert_eq!(one.select(&items, &sim, None).indices, vec![0], "{method:?}");

            let all = DiversitySelector::new(DiversitySettings {
                method,
                output_k: 10,
                ..Default::default()
            });
            assert_eq!(all.select(&items, &sim, None).indices.len(), 4, "{method:?}");
        }
    }

    #[test]
    fn test_apply_ranks_follow_selection_order() {
        let items = pool();
        let sim = matrix(&items);
        for method in [DiversityMethod::Mmr, DiversityMethod::Dpp] {
            let selector = DiversitySelector::new(DiversitySettings {
                method,
                output_k: 3,
                ..Default::default()
            });
            let (chosen, _) = selector.apply(&items, &sim, None);
            let ids: Vec<&str> = chosen.iter().map(|c| c.candidate.id.as_str()).collect();
            let ranks: Vec<usize> = chosen.iter().map(|c| c.fused_rank).collect();

            // "c" scores below the near-duplicate "b" but is picked first.
            let pos = |id: &str| ids.iter().position(|x| *x == id);
            assert_eq!(ids[0], "a", "{method:?}");
            assert_eq!(ids[1], "c", "{method:?}");
            assert!(pos("b").map_or(true, |b| b > 1), "{method:?}");
            assert_eq!(ranks, (1..=chosen.len()).collect::<Vec<_>>(), "{method:?}");

            let c = &chosen[1];
            assert_eq!(c.fused_rank, 2);
            assert!(chosen
                .iter()
                .filter(|o| o.fused_score > c.fused_score)
                .all(|o| o.candidate.id == "a" || o.fused_rank > c.fused_rank));
        }
    }

    #[test]
    fn test_fused_relevance_keeps_unscored_tail_below_head() {
        let mut items = pool();
        items[0].rerank_score = Some(-2.0);
        items[1].rerank_score = Some(-4.0);

        let relevance = fused_relevance(&items);
        assert_eq!(relevance, vec![-2.0, -4.0, -5.0, -6.0]);

        let sim = matrix(&items);
        let selector = DiversitySelector::new(DiversitySettings {
            method: DiversityMethod::TopK,
            output_k: 4,
            ..Default::default()
        });
        let (chosen, _) = selector.apply(&items, &sim, None);
        let ids: Vec<&str> = chosen.iter().map(|c| c.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }
}
