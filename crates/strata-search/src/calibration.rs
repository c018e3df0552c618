//! Score calibration chain.
//!
//! Maps source-native scores onto a common `[0,1]` scale before fusion (per
//! source) or reshapes fused scores after fusion. A chain is an ordered list
//! of stateless calibrators configured by the plan; every stage clamps its
//! output to `[0,1]` and maps non-finite values to `0.0`.
//!
//! | Calibrator             | Transform                                      |
//! |------------------------|------------------------------------------------|
//! | [`PlattScaling`]       | `1 / (1 + exp(a*s + b))`                       |
//! | [`IsotonicLookup`]     | piecewise-linear breakpoints, flat outside     |
//! | [`TemperatureScaling`] | `1 / (1 + exp(-s / t))`                        |
//! | [`RecencyBoost`]       | `s * (floor + (1-floor) * 0.5^(age/half_life))`|
//! | [`AuthorityBoost`]     | `s * ((1-mix) + mix * tier_weight)`            |
//!
//! A source with no entries gets the conservative compressor
//! `0.1 + 0.8 * clamp01(s)`.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

use strata_core::defaults;
use strata_core::{
    Candidate, CalibrationPhase, CalibrationSpec, Error, FusedCandidate, Result,
};

/// Clamp to `[0,1]`; NaN and infinities become `0.0`.
#[inline]
pub fn clamp01(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Per-call inputs shared by every calibrator.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationContext {
    /// Reference time for recency decay.
    pub now: DateTime<Utc>,
}

impl CalibrationContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl Default for CalibrationContext {
    fn default() -> Self {
        Self { now: Utc::now() }
    }
}

// ─── Calibrator trait ───────────────────────────────────────────────────────

/// A stateless score transform.
///
/// Implementations receive a finite score and may read candidate metadata
/// (publication time, authority tier). The chain clamps their output.
pub trait Calibrator: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn calibrate(&self, score: f64, candidate: &Candidate, ctx: &CalibrationContext) -> f64;
}

// ─── Platt ──────────────────────────────────────────────────────────────────

/// Logistic scaling `1 / (1 + exp(a*s + b))`.
///
/// `a` is normally negative so higher raw scores map higher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlattScaling {
    pub a: f64,
    pub b: f64,
}

impl Calibrator for PlattScaling {
    fn name(&self) -> &'static str {
        "platt"
    }

    fn calibrate(&self, score: f64, _: &Candidate, _: &CalibrationContext) -> f64 {
        1.0 / (1.0 + (self.a * score + self.b).exp())
    }
}

// ─── Isotonic ───────────────────────────────────────────────────────────────

/// Monotonic breakpoint table with linear interpolation.
#[derive(Debug, Clone, PartialEq)]
pub struct IsotonicLookup {
    /// `(raw, calibrated)` pairs sorted by `raw`.
    breakpoints: Vec<(f64, f64)>,
}

impl IsotonicLookup {
    /// Build from breakpoints; sorts them and rejects empty or non-finite tables.
    pub fn new(mut breakpoints: Vec<(f64, f64)>) -> Result<Self> {
        if breakpoints.is_empty() {
            return Err(Error::InvalidPlan(
                "isotonic calibration needs at least one breakpoint".to_string(),
            ));
        }
        if breakpoints
            .iter()
            .any(|(x, y)| !x.is_finite() || !y.is_finite())
        {
            return Err(Error::InvalidPlan(
                "isotonic breakpoints must be finite".to_string(),
            ));
        }
        breakpoints.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self { breakpoints })
    }
}

impl Calibrator for IsotonicLookup {
    fn name(&self) -> &'static str {
        "isotonic"
    }

    fn calibrate(&self, score: f64, _: &Candidate, _: &CalibrationContext) -> f64 {
        let points = &self.breakpoints;
        let (first, last) = (points[0], points[points.len() - 1]);
        if score <= first.0 {
            return first.1;
        }
        if score >= last.0 {
            return last.1;
        }

        // First breakpoint strictly above `score`; its predecessor is at or below.
        let upper = points.partition_point(|(x, _)| *x <= score);
        let (x0, y0) = points[upper - 1];
        let (x1, y1) = points[upper];
        if x1 == x0 {
            return y0;
        }
        y0 + (score - x0) * (y1 - y0) / (x1 - x0)
    }
}

// ─── Temperature ────────────────────────────────────────────────────────────

/// Temperature scaling `sigmoid(s / t)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureScaling {
    pub temperature: f64,
}

impl Calibrator for TemperatureScaling {
    fn name(&self) -> &'static str {
        "temperature"
    }

    fn calibrate(&self, score: f64, _: &Candidate, _: &CalibrationContext) -> f64 {
        sigmoid(score / self.temperature)
    }
}

// ─── Recency ────────────────────────────────────────────────────────────────

/// Exponential age decay with a floor; undated candidates pass unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecencyBoost {
    pub half_life_days: f64,
    /// Share of the score an arbitrarily old document keeps.
    pub floor: f64,
}

impl RecencyBoost {
    /// Multiplier for a document `age_days` old.
    pub fn multiplier(&self, age_days: f64) -> f64 {
        let decay = 0.5_f64.powf(age_days.max(0.0) / self.half_life_days);
        self.floor + (1.0 - self.floor) * decay
    }
}

impl Calibrator for RecencyBoost {
    fn name(&self) -> &'static str {
        "recency"
    }

    fn calibrate(&self, score: f64, candidate: &Candidate, ctx: &CalibrationContext) -> f64 {
        match candidate.published_at {
            Some(published) => {
                let age_days = (ctx.now - published).num_seconds() as f64 / 86_400.0;
                score * self.multiplier(age_days)
            }
            None => score,
        }
    }
}

// ─── Authority ──────────────────────────────────────────────────────────────

/// Multiplicative blend with a per-tier trust weight.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorityBoost {
    pub tiers: BTreeMap<String, f64>,
    /// Weight for candidates with no tier or an unknown tier.
    pub default_weight: f64,
    /// How much of the score the tier weight controls.
    pub mix: f64,
}

impl AuthorityBoost {
    /// Built-in tier table used when a plan entry lists no tiers.
    pub fn default_tiers() -> BTreeMap<String, f64> {
        [
            ("official", 1.0),
            ("academic", 0.9),
            ("reference", 0.8),
            ("news", 0.7),
            ("wiki", 0.6),
            ("blog", 0.4),
            ("forum", 0.3),
        ]
        .into_iter()
        .map(|(tier, w)| (tier.to_string(), w))
        .collect()
    }

    fn tier_weight(&self, candidate: &Candidate) -> f64 {
        candidate
            .authority_tier
            .as_deref()
            .and_then(|tier| self.tiers.get(&tier.to_lowercase()))
            .copied()
            .unwrap_or(self.default_weight)
    }
}

impl Calibrator for AuthorityBoost {
    fn name(&self) -> &'static str {
        "authority"
    }

    fn calibrate(&self, score: f64, candidate: &Candidate, _: &CalibrationContext) -> f64 {
        let weight = clamp01(self.tier_weight(candidate));
        score * ((1.0 - self.mix) + self.mix * weight)
    }
}

// ─── Construction from plan entries ─────────────────────────────────────────

/// Build one calibrator from its plan entry.
pub fn build_calibrator(spec: &CalibrationSpec) -> Result<Box<dyn Calibrator>> {
    let positive = |name: &str, value: f64| -> Result<f64> {
        if value.is_finite() && value > 0.0 {
            Ok(value)
        } else {
            Err(Error::InvalidPlan(format!(
                "{} calibration parameter '{}' must be positive, got {}",
                spec.method, name, value
            )))
        }
    };

    let calibrator: Box<dyn Calibrator> = match spec.method.to_lowercase().as_str() {
        "platt" | "logistic" => Box::new(PlattScaling {
            a: spec.param("a", -1.0),
            b: spec.param("b", 0.0),
        }),
        "isotonic" => Box::new(IsotonicLookup::new(spec.breakpoints.clone())?),
        "temperature" => Box::new(TemperatureScaling {
            temperature: positive("t", spec.param("t", 1.0))?,
        }),
        "recency" => Box::new(RecencyBoost {
            half_life_days: positive(
                "half_life_days",
                spec.param("half_life_days", defaults::RECENCY_HALF_LIFE_DAYS),
            )?,
            floor: clamp01(spec.param("floor", defaults::RECENCY_FLOOR)),
        }),
        "authority" => Box::new(AuthorityBoost {
            tiers: if spec.tiers.is_empty() {
                AuthorityBoost::default_tiers()
            } else {
                spec.tiers
                    .iter()
                    .map(|(tier, w)| (tier.to_lowercase(), *w))
                    .collect()
            },
            default_weight: clamp01(spec.param("default_weight", 0.5)),
            mix: clamp01(spec.param("mix", 0.5)),
        }),
        other => {
            return Err(Error::InvalidPlan(format!(
                "unknown calibration method '{}'",
                other
            )))
        }
    };

    Ok(calibrator)
}

// ─── Chain ──────────────────────────────────────────────────────────────────

/// Ordered sequence of calibrators.
#[derive(Debug, Default)]
pub struct CalibrationChain {
    stages: Vec<Box<dyn Calibrator>>,
}

impl CalibrationChain {
    pub fn new(stages: Vec<Box<dyn Calibrator>>) -> Self {
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Stage names in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the chain; an empty chain applies the default compressor.
    pub fn apply(&self, score: f64, candidate: &Candidate, ctx: &CalibrationContext) -> f64 {
        if !score.is_finite() {
            return 0.0;
        }
        if self.stages.is_empty() {
            return clamp01(defaults::COMPRESSOR_OFFSET + defaults::COMPRESSOR_SPAN * clamp01(score));
        }
        self.stages
            .iter()
            .fold(score, |s, stage| clamp01(stage.calibrate(s, candidate, ctx)))
    }
}

/// Pre-fusion chains per source plus one post-fusion chain.
#[derive(Debug, Default)]
pub struct CalibrationPlan {
    per_source: HashMap<String, CalibrationChain>,
    post_fusion: CalibrationChain,
}

impl CalibrationPlan {
    /// Build from plan entries.
    ///
    /// Invalid entries are skipped and returned alongside the plan so the
    /// caller can record them; the rest of the chain still applies.
    pub fn from_specs(specs: &[CalibrationSpec]) -> (Self, Vec<Error>) {
        let mut per_source: HashMap<String, Vec<Box<dyn Calibrator>>> = HashMap::new();
        let mut post = Vec::new();
        let mut errors = Vec::new();

        for spec in specs {
            match build_calibrator(spec) {
                Ok(calibrator) => match spec.phase {
                    CalibrationPhase::PreFusion => {
                        per_source
                            .entry(spec.source.clone())
                            .or_default()
                            .push(calibrator);
                    }
                    CalibrationPhase::PostFusion => post.push(calibrator),
                },
                Err(e) => {
                    warn!(
                        source = %spec.source,
                        method = %spec.method,
                        error = %e,
                        "Skipping invalid calibration entry"
                    );
                    errors.push(e);
                }
            }
        }

        let plan = Self {
            per_source: per_source
                .into_iter()
                .map(|(source, stages)| (source, CalibrationChain::new(stages)))
                .collect(),
            post_fusion: CalibrationChain::new(post),
        };
        (plan, errors)
    }

    /// Chain configured for `source`, if any.
    pub fn chain_for(&self, source: &str) -> Option<&CalibrationChain> {
        self.per_source.get(source)
    }

    pub fn has_post_fusion(&self) -> bool {
        !self.post_fusion.is_empty()
    }

    /// Rewrite the working score of every candidate in one branch.
    pub fn calibrate_branch(
        &self,
        source: &str,
        candidates: &mut [Candidate],
        ctx: &CalibrationContext,
    ) {
        let empty = CalibrationChain::default();
        let chain = self.chain_for(source).unwrap_or(&empty);
        for candidate in candidates.iter_mut() {
            candidate.score = chain.apply(candidate.raw_score, candidate, ctx);
        }
        debug!(
            source,
            stages = ?chain.names(),
            result_count = candidates.len(),
            "Branch calibrated"
        );
    }

    /// Apply the post-fusion chain to fused scores, then re-sort and re-rank.
    ///
    /// `priority` maps a source name to its position in the plan order.
    /// No-op when no post-fusion entries exist.
    pub fn calibrate_fused(
        &self,
        fused: &mut [FusedCandidate],
        ctx: &CalibrationContext,
        priority: impl Fn(&str) -> usize,
    ) {
        if self.post_fusion.is_empty() {
            return;
        }
        for c in fused.iter_mut() {
            c.fused_score = self.post_fusion.apply(c.fused_score, &c.candidate, ctx);
        }
        crate::fusion::sort_fused(fused, priority);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn cand() -> Candidate {
        Candidate::new("a", "web", 1, 0.0)
    }

    fn ctx() -> CalibrationContext {
        CalibrationContext::default()
    }

    #[test]
    fn test_empty_chain_compresses() {
        let chain = CalibrationChain::default();
        assert!((chain.apply(0.0, &cand(), &ctx()) - 0.1).abs() < 1e-12);
        assert!((chain.apply(1.0, &cand(), &ctx()) - 0.9).abs() < 1e-12);
        assert!((chain.apply(0.5, &cand(), &ctx()) - 0.5).abs() < 1e-12);
        // Out-of-range raw scores are clamped before compressing.
        assert!((chain.apply(17.0, &cand(), &ctx()) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_inputs_map_to_zero() {
        let chain = CalibrationChain::new(vec![Box::new(PlattScaling { a: -1.0, b: 0.0 })]);
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(chain.apply(bad, &cand(), &ctx()), 0.0);
            assert_eq!(CalibrationChain::default().apply(bad, &cand(), &ctx()), 0.0);
        }
    }

    #[test]
    fn test_platt_is_logistic() {
        let platt = PlattScaling { a: -2.0, b: 1.0 };
        let expected = 1.0 / (1.0 + (-2.0f64 * 0.5 + 1.0).exp());
        assert!((platt.calibrate(0.5, &cand(), &ctx()) - expected).abs() < 1e-12);
        assert!((platt.calibrate(0.5, &cand(), &ctx()) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_temperature_scaling() {
        let t = TemperatureScaling { temperature: 2.0 };
        assert!((t.calibrate(0.0, &cand(), &ctx()) - 0.5).abs() < 1e-12);
        assert!(t.calibrate(4.0, &cand(), &ctx()) > 0.85);
    }

    #[test]
    fn test_isotonic_interpolates_and_extrapolates_flat() {
        let iso = IsotonicLookup::new(vec![(10.0, 0.9), (0.0, 0.1), (5.0, 0.5)]).unwrap();
        assert_eq!(iso.calibrate(-3.0, &cand(), &ctx()), 0.1);
        assert_eq!(iso.calibrate(50.0, &cand(), &ctx()), 0.9);
        assert!((iso.calibrate(2.5, &cand(), &ctx()) - 0.3).abs() < 1e-12);
        assert!((iso.calibrate(7.5, &cand(), &ctx()) - 0.7).abs() < 1e-12);
        assert_eq!(iso.calibrate(5.0, &cand(), &ctx()), 0.5);
    }

    #[test]
    fn test_isotonic_rejects_empty_table() {
        assert!(IsotonicLookup::new(vec![]).is_err());
    }

    #[test]
    fn test_recency_decays_but_never_zeroes() {
        let now = Utc::now();
        let boost = RecencyBoost {
            half_life_days: 30.0,
            floor: 0.5,
        };
        let fresh = cand().with_published_at(now);
        let month_old = cand().with_published_at(now - Duration::days(30));
        let ancient = cand().with_published_at(now - Duration::days(30_000));
        let c = CalibrationContext::at(now);

        assert!((boost.calibrate(0.8, &fresh, &c) - 0.8).abs() < 1e-9);
        assert!((boost.calibrate(0.8, &month_old, &c) - 0.8 * 0.75).abs() < 1e-9);
        let old = boost.calibrate(0.8, &ancient, &c);
        assert!(old > 0.39 && old < 0.41);
        // Undated candidates are untouched.
        assert_eq!(boost.calibrate(0.8, &cand(), &c), 0.8);
    }

    #[test]
    fn test_authority_blend_by_tier() {
        let boost = AuthorityBoost {
            tiers: AuthorityBoost::default_tiers(),
            default_weight: 0.5,
            mix: 0.5,
        };
        let official = cand().with_authority_tier("Official");
        let forum = cand().with_authority_tier("forum");
        assert!((boost.calibrate(0.8, &official, &ctx()) - 0.8).abs() < 1e-12);
        assert!((boost.calibrate(0.8, &forum, &ctx()) - 0.8 * 0.65).abs() < 1e-12);
        assert!((boost.calibrate(0.8, &cand(), &ctx()) - 0.8 * 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_method_is_invalid_plan() {
        let spec = CalibrationSpec::new("web", "magic");
        assert!(matches!(build_calibrator(&spec), Err(Error::InvalidPlan(_))));
    }

    #[test]
    fn test_temperature_must_be_positive() {
        let spec = CalibrationSpec::new("web", "temperature").with_param("t", 0.0);
        assert!(build_calibrator(&spec).is_err());
    }

    #[test]
    fn test_plan_routes_entries_by_source_and_phase() {
        let specs = vec![
            CalibrationSpec::new("web", "platt").with_param("a", -4.0),
            CalibrationSpec::new("web", "authority"),
            CalibrationSpec::new("", "temperature").post_fusion(),
            CalibrationSpec::new("kg", "bogus"),
        ];
        let (plan, errors) = CalibrationPlan::from_specs(&specs);
        assert_eq!(errors.len(), 1);
        assert_eq!(plan.chain_for("web").map(|c| c.names()), Some(vec!["platt", "authority"]));
        assert!(plan.chain_for("kg").is_none());
        assert!(plan.has_post_fusion());
    }

    #[test]
    fn test_calibrate_branch_uses_raw_scores() {
        let specs = vec![CalibrationSpec::new("web", "platt").with_param("a", -1.0)];
        let (plan, _) = CalibrationPlan::from_specs(&specs);
        let mut branch = vec![
            Candidate::new("a", "web", 1, 2.0),
            Candidate::new("b", "web", 2, 0.0),
        ];
        plan.calibrate_branch("web", &mut branch, &ctx());
        assert!((branch[0].score - 1.0 / (1.0 + (-2.0f64).exp())).abs() < 1e-12);
        assert!((branch[1].score - 0.5).abs() < 1e-12);

        // A source without entries gets the compressor.
        let mut other = vec![Candidate::new("c", "kg", 1, 1.0)];
        plan.calibrate_branch("kg", &mut other, &ctx());
        assert!((other[0].score - 0.9).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn calibrated_scores_stay_in_unit_interval(
            raw in prop::num::f64::ANY,
            a in -10.0f64..10.0,
            b in -10.0f64..10.0,
            t in 0.01f64..10.0,
        ) {
            let chain = CalibrationChain::new(vec![
                Box::new(PlattScaling { a, b }),
                Box::new(TemperatureScaling { temperature: t }),
                Box::new(RecencyBoost { half_life_days: 30.0, floor: 0.5 }),
            ]);
            let out = chain.apply(raw, &cand(), &ctx());
            prop_assert!((0.0..=1.0).contains(&out));

            let compressed = CalibrationChain::default().apply(raw, &cand(), &ctx());
            prop_assert!((0.0..=1.0).contains(&compressed));
        }
    }
}
