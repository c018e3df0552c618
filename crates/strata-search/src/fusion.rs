//! Multi-branch fusion engine.
//!
//! Merges per-source candidate lists into one ranked list. The base scalar is
//! weighted RRF, a weighted power mean of calibrated scores, or a blend of
//! both; an optional CVaR term penalizes uneven cross-source support.
//!
//! Ordering is fully deterministic: fused score descending, then the lowest
//! rank the candidate reached in any branch, then the earliest branch in plan
//! order that returned it, then id ascending.

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use strata_core::{assign_ranks, Candidate, FusedCandidate, FusionMethod, FusionSettings};

use crate::calibration::clamp01;
use crate::power_mean::weighted_power_mean;
use crate::rrf::{max_rrf_score, normalize_rrf, weighted_rrf};
use crate::tail_risk::{blend_tail_risk, cvar};

/// One source's candidate list, ranked best-first.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub source: String,
    pub weight: f64,
    pub candidates: Vec<Candidate>,
}

impl Branch {
    pub fn new(source: impl Into<String>, weight: f64, candidates: Vec<Candidate>) -> Self {
        Self {
            source: source.into(),
            weight,
            candidates,
        }
    }
}

/// Per-id accumulation across branches.
struct Accumulator {
    candidate: Candidate,
    /// Rank and calibrated score per branch index.
    hits: Vec<Option<(usize, f64)>>,
    min_rank: usize,
}

/// Fuses branches according to plan settings.
#[derive(Debug, Clone, Copy)]
pub struct FusionEngine {
    settings: FusionSettings,
}

impl FusionEngine {
    pub fn new(settings: FusionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    /// Whether RRF is mapped onto `[0,1]` before use.
    ///
    /// Implied whenever RRF is combined with another `[0,1]` quantity.
    fn normalizes_rrf(&self) -> bool {
        self.settings.normalize
            || self.settings.method == FusionMethod::Blend
            || self.settings.tail_risk.is_some()
    }

    /// Fuse `branches` (given in plan order) into a ranked list.
    ///
    /// Rank within a branch is the 1-based position as delivered; a repeated
    /// id inside one branch keeps only its first occurrence. Output ranks are
    /// contiguous `1..=N` over distinct ids.
    pub fn fuse(&self, branches: &[Branch]) -> Vec<FusedCandidate> {
        let n_branches = branches.len();
        let weights: Vec<f64> = branches
            .iter()
            .map(|b| if b.weight.is_finite() { b.weight.max(0.0) } else { 0.0 })
            .collect();

        let mut index: HashMap<String, usize> = HashMap::new();
        let mut entries: Vec<Accumulator> = Vec::new();

        for (b_idx, branch) in branches.iter().enumerate() {
            for (pos, candidate) in branch.candidates.iter().enumerate() {
                let rank = pos + 1;
                let slot = match index.get(&candidate.id) {
                    Some(&slot) => slot,
                    None => {
                        index.insert(candidate.id.clone(), entries.len());
                        entries.push(Accumulator {
                            candidate: candidate.clone(),
                            hits: vec![None; n_branches],
                            min_rank: rank,
                        });
                        entries.len() - 1
                    }
                };
                let entry = &mut entries[slot];
                if entry.hits[b_idx].is_none() {
                    entry.hits[b_idx] = Some((rank, clamp01(candidate.score)));
                    entry.min_rank = entry.min_rank.min(rank);
                }
            }
        }

        let k = self.settings.k_rrf;
        let max_rrf = max_rrf_score(&weights, k);
        let normalize = self.normalizes_rrf();

        let mut fused: Vec<FusedCandidate> = entries
            .into_iter()
            .map(|entry| {
                let ranks: Vec<Option<usize>> =
                    entry.hits.iter().map(|h| h.map(|(r, _)| r)).collect();
                let rrf = weighted_rrf(&ranks, &weights, k);
                let rrf = if normalize {
                    normalize_rrf(rrf, max_rrf)
                } else {
                    rrf
                };

                let base = match self.settings.method {
                    FusionMethod::Rrf => rrf,
                    FusionMethod::PowerMean => self.power_mean(&entry.hits, &weights),
                    FusionMethod::Blend => {
                        let w = self.settings.rrf_weight.clamp(0.0, 1.0);
                        w * rrf + (1.0 - w) * self.power_mean(&entry.hits, &weights)
                    }
                };

                let score = match self.settings.tail_risk {
                    Some(tail) => {
                        let per_branch: Vec<f64> = entry
                            .hits
                            .iter()
                            .map(|h| h.map(|(_, s)| s).unwrap_or(0.0))
                            .collect();
                        blend_tail_risk(base, cvar(&per_branch, tail.alpha), tail.lambda)
                    }
                    None => base,
                };

                let sources = entry
                    .hits
                    .iter()
                    .enumerate()
                    .filter(|(_, h)| h.is_some())
                    .map(|(i, _)| branches[i].source.clone())
                    .collect();

                FusedCandidate {
                    candidate: entry.candidate,
                    fused_score: if score.is_finite() { score } else { 0.0 },
                    fused_rank: 0,
                    rerank_score: None,
                    sources,
                    min_source_rank: entry.min_rank,
                }
            })
            .collect();

        let priority = |source: &str| {
            branches
                .iter()
                .position(|b| b.source == source)
                .unwrap_or(n_branches)
        };
        sort_fused(&mut fused, priority);

        debug!(
            fusion_method = self.settings.method.as_str(),
            rrf_k = k,
            input_lists = n_branches,
            result_count = fused.len(),
            "Fusion complete"
        );

        fused
    }

    /// Power mean over branches where the candidate appears.
    fn power_mean(&self, hits: &[Option<(usize, f64)>], weights: &[f64]) -> f64 {
        let (values, ws): (Vec<f64>, Vec<f64>) = hits
            .iter()
            .zip(weights)
            .filter_map(|(h, w)| h.map(|(_, s)| (s, *w)))
            .unzip();
        weighted_power_mean(&values, &ws, self.settings.p)
    }
}

/// Sort fused candidates into their final order and assign contiguous ranks.
///
/// `priority` maps a source to its position in plan order; a candidate's
/// priority is that of the first source in its `sources` list.
pub fn sort_fused(fused: &mut [FusedCandidate], priority: impl Fn(&str) -> usize) {
    let first_priority = |c: &FusedCandidate| {
        c.sources
            .iter()
            .map(|s| priority(s))
            .min()
            .unwrap_or(usize::MAX)
    };
    fused.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.min_source_rank.cmp(&b.min_source_rank))
            .then_with(|| first_priority(a).cmp(&first_priority(b)))
            .then_with(|| a.id().cmp(b.id()))
    });
    assign_ranks(fused);
}

/// Compare by an optional score, higher first, treating NaN as lowest.
pub(crate) fn score_desc(a: f64, b: f64) -> Ordering {
    let a = if a.is_nan() { f64::NEG_INFINITY } else { a };
    let b = if b.is_nan() { f64::NEG_INFINITY } else { b };
    b.total_cmp(&a)
}
