//! Per-source result-count allocation.
//!
//! Splits a total K across the plan's sources. Every strategy guarantees
//! `Σk_i == total_k` and `k_i >= floor_i`; floor enforcement may perturb the
//! distribution so no selected source is ever starved.
//!
//! Fix-up after rounding and flooring:
//! - overflow: decrement the source with the highest current K that is still
//!   above its floor (ties go to the lowest index) until the sum fits;
//! - underflow: increment sources in index order, cycling, until the sum fits.

use serde::{Deserialize, Serialize};
use tracing::debug;

use strata_core::{AllocationStrategy, Error, Result};

/// Allocation inputs for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInput {
    pub source: String,
    /// Reliability in arbitrary units; only differences matter to the softmax.
    pub reliability: f64,
    pub floor: usize,
    /// Static ratio used by [`AllocationStrategy::Static`].
    pub ratio: usize,
    /// Observed failure rate in [0,1], used by [`AllocationStrategy::RiskAware`].
    pub failure_rate: f64,
}

impl SourceInput {
    pub fn new(source: impl Into<String>, reliability: f64) -> Self {
        Self {
            source: source.into(),
            reliability,
            floor: 0,
            ratio: 1,
            failure_rate: 0.0,
        }
    }

    pub fn with_floor(mut self, floor: usize) -> Self {
        self.floor = floor;
        self
    }

    pub fn with_ratio(mut self, ratio: usize) -> Self {
        self.ratio = ratio;
        self
    }

    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate;
        self
    }
}

/// Resulting K per source, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub entries: Vec<(String, usize)>,
}

impl Allocation {
    /// K assigned to `source` (0 when absent).
    pub fn get(&self, source: &str) -> usize {
        self.entries
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, k)| *k)
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, k)| k).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries.iter().map(|(s, k)| (s.as_str(), *k))
    }
}

/// Numerically stable softmax of `values / temperature`.
pub fn softmax_weights(values: &[f64], temperature: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let t = if temperature.is_finite() && temperature > 0.0 {
        temperature
    } else {
        1.0
    };
    let scaled: Vec<f64> = values
        .iter()
        .map(|v| if v.is_finite() { v / t } else { 0.0 })
        .collect();
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scaled.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Split `total_k` across `inputs` according to `strategy`.
///
/// Returns [`Error::InvalidPlan`] when the floors alone exceed `total_k` or
/// when there are no sources to receive a non-zero K.
pub fn allocate(
    total_k: usize,
    inputs: &[SourceInput],
    strategy: &AllocationStrategy,
) -> Result<Allocation> {
    let floor_sum: usize = inputs.iter().map(|i| i.floor).sum();
    if floor_sum > total_k {
        return Err(Error::InvalidPlan(format!(
            "source floors sum to {} but total K is {}",
            floor_sum, total_k
        )));
    }
    if inputs.is_empty() {
        if total_k == 0 {
            return Ok(Allocation::default());
        }
        return Err(Error::InvalidPlan("no sources to allocate to".to_string()));
    }

    let initial = match *strategy {
        AllocationStrategy::Static => {
            let ratios: Vec<f64> = inputs.iter().map(|i| i.ratio as f64).collect();
            largest_remainder(total_k, &ratios)
        }
        AllocationStrategy::Softmax { temperature } => {
            let reliability: Vec<f64> = inputs.iter().map(|i| i.reliability).collect();
            rounded_shares(total_k, &softmax_weights(&reliability, temperature))
        }
        AllocationStrategy::RiskAware {
            temperature,
            aversion,
        } => {
            let adjusted: Vec<f64> = inputs
                .iter()
                .map(|i| i.reliability - aversion * i.failure_rate.clamp(0.0, 1.0))
                .collect();
            rounded_shares(total_k, &softmax_weights(&adjusted, temperature))
        }
    };

    let floors: Vec<usize> = inputs.iter().map(|i| i.floor).collect();
    let ks = enforce_total(initial, &floors, total_k);

    let allocation = Allocation {
        entries: inputs
            .iter()
            .zip(ks)
            .map(|(i, k)| (i.source.clone(), k))
            .collect(),
    };

    debug!(
        total_k,
        strategy = ?strategy,
        allocation = ?allocation.entries,
        "K allocation complete"
    );

    Ok(allocation)
}

fn rounded_shares(total_k: usize, weights: &[f64]) -> Vec<usize> {
    weights
        .iter()
        .map(|w| (total_k as f64 * w).round().max(0.0) as usize)
        .collect()
}

/// Proportional split with largest-remainder rounding (ties by index).
fn largest_remainder(total_k: usize, ratios: &[f64]) -> Vec<usize> {
    let sum: f64 = ratios.iter().sum();
    let shares: Vec<f64> = if sum > 0.0 {
        ratios.iter().map(|r| total_k as f64 * r / sum).collect()
    } else {
        vec![total_k as f64 / ratios.len() as f64; ratios.len()]
    };

    let mut ks: Vec<usize> = shares.iter().map(|s| s.floor() as usize).collect();
    let assigned: usize = ks.iter().sum();
    let mut order: Vec<usize> = (0..ks.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = shares[a] - shares[a].floor();
        let rb = shares[b] - shares[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    for &idx in order.iter().take(total_k.saturating_sub(assigned)) {
        ks[idx] += 1;
    }
    ks
}

/// Raise to floors, then fix the sum to exactly `total_k`.
///
/// Requires `Σfloors <= total_k` and a non-empty input.
fn enforce_total(mut ks: Vec<usize>, floors: &[usize], total_k: usize) -> Vec<usize> {
    for (k, floor) in ks.iter_mut().zip(floors) {
        *k = (*k).max(*floor);
    }

    let mut sum: usize = ks.iter().sum();
    while sum > total_k {
        let victim = ks
            .iter()
            .enumerate()
            .filter(|(i, k)| **k > floors[*i])
            .max_by(|(ia, ka), (ib, kb)| ka.cmp(kb).then(ib.cmp(ia)))
            .map(|(i, _)| i);
        match victim {
            Some(i) => {
                ks[i] -= 1;
                sum -= 1;
            }
            None => break,
        }
    }

    let n = ks.len();
    let mut idx = 0;
    while sum < total_k {
        ks[idx % n] += 1;
        sum += 1;
        idx += 1;
    }

    ks
}
