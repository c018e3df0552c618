//! Final quality gate.
//!
//! Two requirements must hold for a pass:
//! - hard: `citation_count >= min_citations`;
//! - soft: `sigmoid(k · (x - x0)) >= pass_threshold` where
//!   `x = w_e·(1 - exp(-n / saturation)) + w_a·authority + w_r·reproducibility - w_c·contradiction`.
//!
//! An optional risk signal above `max_risk` fails the gate as well. Every
//! failed check is reported so the caller can pick a degraded answer mode.

use serde::{Deserialize, Serialize};
use tracing::debug;

use strata_core::{FusedCandidate, GateCheck, GateThresholds, QualityDecision};

use crate::calibration::clamp01;

/// Evidence signals fed to the gate.
///
/// Missing values are derived from the candidates: citation count from
/// candidates with a snippet, authority from mean relevance, reproducibility
/// from the share of candidates corroborated by more than one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSignals {
    pub citation_count: Option<usize>,
    pub authority: Option<f64>,
    pub reproducibility: Option<f64>,
    /// Degree of conflict between sources in `[0,1]`.
    pub contradiction: f64,
    /// Caller-assessed answer risk in `[0,1]`.
    pub risk: f64,
}

/// Signals resolved against a candidate list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedSignals {
    pub evidence_count: usize,
    pub citation_count: usize,
    pub authority: f64,
    pub reproducibility: f64,
    pub contradiction: f64,
    pub risk: f64,
}

impl GateSignals {
    pub fn resolve(&self, candidates: &[FusedCandidate]) -> ResolvedSignals {
        let n = candidates.len();
        let citation_count = self.citation_count.unwrap_or_else(|| {
            candidates
                .iter()
                .filter(|c| !c.candidate.snippet.trim().is_empty())
                .count()
        });
        let authority = self.authority.unwrap_or_else(|| {
            if n == 0 {
                0.0
            } else {
                candidates.iter().map(|c| clamp01(c.candidate.score)).sum::<f64>() / n as f64
            }
        });
        let reproducibility = self.reproducibility.unwrap_or_else(|| {
            if n == 0 {
                0.0
            } else {
                candidates.iter().filter(|c| c.sources.len() > 1).count() as f64 / n as f64
            }
        });

        ResolvedSignals {
            evidence_count: n,
            citation_count,
            authority: clamp01(authority),
            reproducibility: clamp01(reproducibility),
            contradiction: clamp01(self.contradiction),
            risk: clamp01(self.risk),
        }
    }
}

/// Pass/fail decision over the final candidate list.
#[derive(Debug, Clone)]
pub struct QualityGate {
    thresholds: GateThresholds,
}

impl QualityGate {
    pub fn new(thresholds: GateThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    /// Combined evidence value fed to the sigmoid.
    pub fn evidence_value(&self, s: &ResolvedSignals) -> f64 {
        let w = &self.thresholds.weights;
        let saturation = if self.thresholds.evidence_saturation > 0.0 {
            self.thresholds.evidence_saturation
        } else {
            1.0
        };
        let evidence = 1.0 - (-(s.evidence_count as f64) / saturation).exp();
        w.evidence * evidence + w.authority * s.authority + w.reproducibility * s.reproducibility
            - w.contradiction * s.contradiction
    }

    /// `1 / (1 + exp(-k (x - x0)))`.
    pub fn sigmoid_score(&self, x: f64) -> f64 {
        let t = &self.thresholds;
        let z = 1.0 / (1.0 + (-t.sigmoid_k * (x - t.sigmoid_x0)).exp());
        clamp01(z)
    }

    /// Decide on `candidates` with caller-provided `signals`.
    pub fn decide(&self, candidates: &[FusedCandidate], signals: &GateSignals) -> QualityDecision {
        self.evaluate(&signals.resolve(candidates))
    }

    /// Decide from already-resolved signals.
    pub fn evaluate(&self, s: &ResolvedSignals) -> QualityDecision {
        let t = &self.thresholds;
        let mut reasons = Vec::new();

        let citations_ok = s.citation_count >= t.min_citations;
        if !citations_ok {
            reasons.push(GateCheck::Citations);
        }

        let sigmoid_score = self.sigmoid_score(self.evidence_value(s));
        if sigmoid_score < t.pass_threshold {
            reasons.push(GateCheck::Sigmoid);
        }

        if s.risk > t.max_risk {
            reasons.push(GateCheck::Risk);
        }

        let decision = QualityDecision {
            passed: reasons.is_empty(),
            citations_ok,
            sigmoid_score,
            reasons,
        };

        debug!(
            passed = decision.passed,
            citations = s.citation_count,
            min_citations = t.min_citations,
            sigmoid_score,
            reasons = ?decision.reasons,
            "Quality gate decided"
        );

        decision
    }
}
