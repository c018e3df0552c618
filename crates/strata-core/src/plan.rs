//! Retrieval plans: named, versioned configuration bundles.
//!
//! A plan decides which sources are queried and in what order, how K is
//! allocated, the per-source timeouts, the calibration chain, fusion and
//! diversity settings, and the quality gate thresholds. Plans are parsed from
//! YAML or JSON profile documents in which every field is optional; missing
//! fields take the values from [`crate::defaults`].
//!
//! ```yaml
//! name: news
//! version: 2
//! order: [web, vector, kg]
//! k: { web: 10, vector: 8, kg: 4 }
//! timeouts: { web: 900, vector: 400 }
//! gates: { minCitations: 3, sigmoidK: 6.0, sigmoidX0: 0.5, passThreshold: 0.5 }
//! calibration:
//!   - { source: web, method: platt, params: { a: -4.0, b: 2.0 } }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// PLAN SECTIONS
// =============================================================================

/// Quality gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateThresholds {
    pub min_citations: usize,
    pub sigmoid_k: f64,
    pub sigmoid_x0: f64,
    pub pass_threshold: f64,
    /// Highest acceptable risk signal.
    pub max_risk: f64,
    /// Weights of the evidence combination fed into the sigmoid.
    pub weights: GateWeights,
    /// Evidence count scale for the saturating evidence term.
    pub evidence_saturation: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_citations: defaults::MIN_CITATIONS,
            sigmoid_k: defaults::SIGMOID_K,
            sigmoid_x0: defaults::SIGMOID_X0,
            pass_threshold: defaults::PASS_THRESHOLD,
            max_risk: defaults::MAX_RISK,
            weights: GateWeights::default(),
            evidence_saturation: defaults::EVIDENCE_SATURATION,
        }
    }
}

/// Weights of the signals combined by the quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateWeights {
    pub evidence: f64,
    pub authority: f64,
    pub reproducibility: f64,
    pub contradiction: f64,
}

impl Default for GateWeights {
    fn default() -> Self {
        Self {
            evidence: 0.5,
            authority: 0.25,
            reproducibility: 0.25,
            contradiction: 0.5,
        }
    }
}

/// When a calibration entry runs relative to fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    /// Applied to one source's scores before fusion.
    #[default]
    PreFusion,
    /// Applied to fused scores.
    PostFusion,
}

/// One calibrator in a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationSpec {
    /// Source the entry applies to; ignored for post-fusion entries.
    #[serde(default)]
    pub source: String,
    /// Calibrator name: "platt", "isotonic", "temperature", "recency", "authority".
    pub method: String,
    #[serde(default)]
    pub phase: CalibrationPhase,
    /// Scalar parameters ("a", "b", "t", "half_life_days", "floor", "mix"...).
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
    /// Monotonic breakpoints for isotonic lookup, as (raw, calibrated) pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breakpoints: Vec<(f64, f64)>,
    /// Trust weight per authority tier.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tiers: BTreeMap<String, f64>,
}

impl CalibrationSpec {
    pub fn new(source: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            method: method.into(),
            phase: CalibrationPhase::PreFusion,
            params: BTreeMap::new(),
            breakpoints: Vec::new(),
            tiers: BTreeMap::new(),
        }
    }

    pub fn post_fusion(mut self) -> Self {
        self.phase = CalibrationPhase::PostFusion;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn with_breakpoints(mut self, breakpoints: Vec<(f64, f64)>) -> Self {
        self.breakpoints = breakpoints;
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>, weight: f64) -> Self {
        self.tiers.insert(tier.into(), weight);
        self
    }

    /// Scalar parameter or `default`.
    pub fn param(&self, name: &str, default: f64) -> f64 {
        self.params.get(name).copied().unwrap_or(default)
    }
}

/// How total K is split across sources.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Proportional to the plan's `k` ratios.
    Static,
    /// Softmax over reliability at `temperature`.
    Softmax {
        #[serde(default = "default_temperature")]
        temperature: f64,
    },
    /// Softmax over reliability minus `aversion` times observed failure rate.
    RiskAware {
        #[serde(default = "default_temperature")]
        temperature: f64,
        #[serde(default = "default_aversion")]
        aversion: f64,
    },
}

fn default_temperature() -> f64 {
    defaults::ALLOCATION_TEMPERATURE
}

fn default_aversion() -> f64 {
    defaults::RISK_AVERSION
}

impl Default for AllocationStrategy {
    fn default() -> Self {
        AllocationStrategy::Softmax {
            temperature: defaults::ALLOCATION_TEMPERATURE,
        }
    }
}

/// Base fusion scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    /// Weighted reciprocal rank fusion.
    #[default]
    Rrf,
    /// Weighted power mean of calibrated scores.
    PowerMean,
    /// Convex blend of normalized RRF and power mean.
    Blend,
}

impl FusionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionMethod::Rrf => "rrf",
            FusionMethod::PowerMean => "power_mean",
            FusionMethod::Blend => "blend",
        }
    }
}

/// Tail-risk (CVaR) adjustment settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailRiskSettings {
    /// Worst fraction of per-branch scores to average.
    pub alpha: f64,
    /// Mixing weight of the CVaR term.
    pub lambda: f64,
}

impl Default for TailRiskSettings {
    fn default() -> Self {
        Self {
            alpha: defaults::CVAR_ALPHA,
            lambda: defaults::CVAR_LAMBDA,
        }
    }
}

/// Fusion engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FusionSettings {
    pub method: FusionMethod,
    pub k_rrf: f64,
    /// Power mean exponent.
    pub p: f64,
    /// Weight of RRF in `Blend`; power mean gets the rest.
    pub rrf_weight: f64,
    /// Normalize RRF to [0,1] by the maximum attainable score.
    pub normalize: bool,
    pub tail_risk: Option<TailRiskSettings>,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            method: FusionMethod::Rrf,
            k_rrf: defaults::RRF_K,
            p: defaults::POWER_MEAN_P,
            rrf_weight: 0.5,
            normalize: false,
            tail_risk: None,
        }
    }
}

/// Reranker stage settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RerankSettings {
    pub enabled: bool,
    /// Number of top fused candidates sent to the cross-encoder.
    pub top_n: usize,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            top_n: defaults::RERANK_TOP_N,
        }
    }
}

/// Diversity selection variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiversityMethod {
    /// Maximal marginal relevance.
    #[default]
    Mmr,
    /// Greedy determinantal point process MAP.
    Dpp,
    /// Plain top-k by score.
    TopK,
}

/// Diversity stage settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiversitySettings {
    pub method: DiversityMethod,
    pub lambda: f64,
    /// Number of candidates kept.
    pub output_k: usize,
}

impl Default for DiversitySettings {
    fn default() -> Self {
        Self {
            method: DiversityMethod::Mmr,
            lambda: defaults::MMR_LAMBDA,
            output_k: defaults::OUTPUT_K,
        }
    }
}

// =============================================================================
// RETRIEVAL PLAN
// =============================================================================

/// A resolved, immutable retrieval plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrievalPlan {
    pub name: String,
    pub version: u32,
    /// Sources to query, in priority order.
    pub order: Vec<String>,
    /// Static K ratios per source (also the `Static` allocation input).
    pub k: BTreeMap<String, usize>,
    /// Total K across sources.
    pub total_k: usize,
    /// Per-source timeouts in milliseconds.
    pub timeouts: BTreeMap<String, u64>,
    /// Fusion weight per source (default 1.0).
    pub weights: BTreeMap<String, f64>,
    /// Baseline reliability per source for allocation.
    pub reliability: BTreeMap<String, f64>,
    /// Minimum K per source.
    pub floors: BTreeMap<String, usize>,
    pub allocation: AllocationStrategy,
    pub gates: GateThresholds,
    pub calibration: Vec<CalibrationSpec>,
    pub fusion: FusionSettings,
    pub rerank: RerankSettings,
    pub diversity: DiversitySettings,
}

impl Default for RetrievalPlan {
    fn default() -> Self {
        let order = vec!["web".to_string(), "vector".to_string(), "kg".to_string()];
        Self {
            name: defaults::DEFAULT_PROFILE.to_string(),
            version: 1,
            k: [("web", 10), ("vector", 10), ("kg", 4)]
                .into_iter()
                .map(|(s, k)| (s.to_string(), k))
                .collect(),
            total_k: defaults::TOTAL_K,
            timeouts: BTreeMap::new(),
            weights: BTreeMap::new(),
            reliability: [("web", 0.8), ("vector", 0.7), ("kg", 0.5)]
                .into_iter()
                .map(|(s, r)| (s.to_string(), r))
                .collect(),
            floors: BTreeMap::new(),
            order,
            allocation: AllocationStrategy::default(),
            gates: GateThresholds::default(),
            calibration: Vec::new(),
            fusion: FusionSettings::default(),
            rerank: RerankSettings::default(),
            diversity: DiversitySettings::default(),
        }
    }
}

impl RetrievalPlan {
    /// Parse a YAML profile document.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let plan: RetrievalPlan = serde_yaml::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Parse a JSON profile document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let plan: RetrievalPlan = serde_json::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Fusion weight of `source`.
    pub fn weight(&self, source: &str) -> f64 {
        self.weights.get(source).copied().unwrap_or(1.0)
    }

    /// Timeout of `source`.
    pub fn timeout(&self, source: &str) -> Duration {
        Duration::from_millis(
            self.timeouts
                .get(source)
                .copied()
                .unwrap_or(defaults::SOURCE_TIMEOUT_MS),
        )
    }

    /// Baseline reliability of `source`.
    pub fn reliability(&self, source: &str) -> f64 {
        self.reliability
            .get(source)
            .copied()
            .unwrap_or(defaults::SOURCE_RELIABILITY)
    }

    /// Minimum K of `source`.
    pub fn floor(&self, source: &str) -> usize {
        self.floors
            .get(source)
            .copied()
            .unwrap_or(defaults::SOURCE_FLOOR)
    }

    /// Position of `source` in the plan order (unknown sources sort last).
    pub fn priority(&self, source: &str) -> usize {
        self.order
            .iter()
            .position(|s| s == source)
            .unwrap_or(self.order.len())
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.order.is_empty() {
            return Err(Error::InvalidPlan(format!("plan '{}' has no sources", self.name)));
        }

        let mut seen = HashSet::new();
        for source in &self.order {
            if source.trim().is_empty() {
                return Err(Error::InvalidPlan("empty source name".to_string()));
            }
            if !seen.insert(source.as_str()) {
                return Err(Error::InvalidPlan(format!("duplicate source '{}'", source)));
            }
        }

        for (source, weight) in &self.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(Error::InvalidPlan(format!(
                    "weight for '{}' must be finite and non-negative, got {}",
                    source, weight
                )));
            }
        }

        for (source, reliability) in &self.reliability {
            if !reliability.is_finite() {
                return Err(Error::InvalidPlan(format!(
                    "reliability for '{}' must be finite",
                    source
                )));
            }
        }

        match self.allocation {
            AllocationStrategy::Static => {}
            AllocationStrategy::Softmax { temperature }
            | AllocationStrategy::RiskAware { temperature, .. } => {
                if !(temperature.is_finite() && temperature > 0.0) {
                    return Err(Error::InvalidPlan(format!(
                        "allocation temperature must be positive, got {}",
                        temperature
                    )));
                }
            }
        }

        let g = &self.gates;
        for (name, value) in [
            ("sigmoidK", g.sigmoid_k),
            ("sigmoidX0", g.sigmoid_x0),
            ("passThreshold", g.pass_threshold),
            ("maxRisk", g.max_risk),
        ] {
            if !value.is_finite() {
                return Err(Error::InvalidPlan(format!("gate {} must be finite", name)));
            }
        }

        if !(self.fusion.k_rrf.is_finite() && self.fusion.k_rrf >= 0.0) {
            return Err(Error::InvalidPlan(format!(
                "kRrf must be non-negative, got {}",
                self.fusion.k_rrf
            )));
        }
        if !self.fusion.p.is_finite() {
            return Err(Error::InvalidPlan("power mean exponent must be finite".to_string()));
        }
        if let Some(tail) = self.fusion.tail_risk {
            if !(tail.alpha > 0.0 && tail.alpha <= 1.0) || !(0.0..=1.0).contains(&tail.lambda) {
                return Err(Error::InvalidPlan(format!(
                    "tail risk alpha must be in (0,1] and lambda in [0,1], got {} / {}",
                    tail.alpha, tail.lambda
                )));
            }
        }

        Ok(())
    }

    /// Apply request-level overrides, producing a new plan.
    pub fn with_overrides(&self, overrides: &RequestOverrides) -> RetrievalPlan {
        let mut plan = self.clone();

        if let Some(ref sources) = overrides.sources {
            let wanted: HashSet<&str> = sources.iter().map(String::as_str).collect();
            let narrowed: Vec<String> = plan
                .order
                .iter()
                .filter(|s| wanted.contains(s.as_str()))
                .cloned()
                .collect();
            if narrowed.is_empty() {
                warn!(
                    plan = %plan.name,
                    requested = ?sources,
                    "Source override matches no plan source, keeping plan order"
                );
            } else {
                plan.order = narrowed;
            }
        }
        if let Some(total_k) = overrides.total_k {
            plan.total_k = total_k;
        }
        if let Some(enabled) = overrides.rerank {
            plan.rerank.enabled = enabled;
        }
        if let Some(method) = overrides.diversity {
            plan.diversity.method = method;
        }
        if let Some(output_k) = overrides.output_k {
            plan.diversity.output_k = output_k;
        }

        plan
    }
}

/// Per-request adjustments on top of a named profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOverrides {
    pub total_k: Option<usize>,
    /// Restrict the query to these sources (plan order is kept).
    pub sources: Option<Vec<String>>,
    pub rerank: Option<bool>,
    pub diversity: Option<DiversityMethod>,
    pub output_k: Option<usize>,
}

// =============================================================================
// PLAN REGISTRY
// =============================================================================

/// Owned registry of named plans with a built-in default.
///
/// One instance per pipeline; never a global.
#[derive(Debug)]
pub struct PlanRegistry {
    plans: RwLock<HashMap<String, Arc<RetrievalPlan>>>,
    default: Arc<RetrievalPlan>,
}

impl Default for PlanRegistry {
    fn default() -> Self {
        Self::new(RetrievalPlan::default())
    }
}

impl PlanRegistry {
    /// Create a registry around `default`, used whenever a lookup fails.
    pub fn new(default: RetrievalPlan) -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
            default: Arc::new(default),
        }
    }

    /// Register a validated plan under its name.
    pub fn insert(&self, plan: RetrievalPlan) -> Result<()> {
        plan.validate()?;
        let name = plan.name.clone();
        let mut plans = self.plans.write().unwrap_or_else(|e| e.into_inner());
        debug!(profile = %name, version = plan.version, "Registered retrieval plan");
        plans.insert(name, Arc::new(plan));
        Ok(())
    }

    /// Parse and register a YAML profile.
    pub fn insert_yaml(&self, text: &str) -> Result<()> {
        self.insert(RetrievalPlan::from_yaml_str(text)?)
    }

    /// Parse and register a JSON profile.
    pub fn insert_json(&self, text: &str) -> Result<()> {
        self.insert(RetrievalPlan::from_json_str(text)?)
    }

    /// Names of registered plans, sorted.
    pub fn names(&self) -> Vec<String> {
        let plans = self.plans.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = plans.keys().cloned().collect();
        names.sort();
        names
    }

    /// The built-in default plan.
    pub fn default_plan(&self) -> Arc<RetrievalPlan> {
        Arc::clone(&self.default)
    }

    /// Look up a plan by name.
    pub fn get(&self, name: &str) -> Option<Arc<RetrievalPlan>> {
        let plans = self.plans.read().unwrap_or_else(|e| e.into_inner());
        plans.get(name).cloned()
    }

    /// Resolve `name` plus overrides; unknown names fall back to the default plan.
    pub fn resolve(&self, name: Option<&str>, overrides: &RequestOverrides) -> RetrievalPlan {
        let base = match name {
            Some(name) => self.get(name).unwrap_or_else(|| {
                warn!(profile = %name, "Unknown retrieval profile, using default plan");
                self.default_plan()
            }),
            None => self.default_plan(),
        };

        let plan = base.with_overrides(overrides);
        if let Err(e) = plan.validate() {
            warn!(profile = %plan.name, error = %e, "Overrides produced an invalid plan, using default");
            return self.default.with_overrides(&RequestOverrides::default());
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEWS_YAML: &str = r#"
name: news
version: 2
order: [web, vector, kg]
k: { web: 10, vector: 8, kg: 4 }
timeouts: { web: 900, vector: 400 }
gates: { minCitations: 2, sigmoidK: 5.0, sigmoidX0: 0.4, passThreshold: 0.55 }
calibration:
  - { source: web, method: platt, params: { a: -4.0, b: 2.0 } }
  - { method: temperature, phase: post_fusion, params: { t: 0.5 } }
"#;

    #[test]
    fn test_default_plan_is_valid() {
        let plan = RetrievalPlan::default();
        assert!(plan.validate().is_ok());
        assert_eq!(plan.order, vec!["web", "vector", "kg"]);
        assert_eq!(plan.fusion.k_rrf, 60.0);
    }

    #[test]
    fn test_parse_yaml_profile_with_defaults() {
        let plan = RetrievalPlan::from_yaml_str(NEWS_YAML).unwrap();
        assert_eq!(plan.name, "news");
        assert_eq!(plan.version, 2);
        assert_eq!(plan.k.get("vector"), Some(&8));
        assert_eq!(plan.timeout("web"), Duration::from_millis(900));
        assert_eq!(
            plan.timeout("kg"),
            Duration::from_millis(defaults::SOURCE_TIMEOUT_MS)
        );
        assert_eq!(plan.gates.min_citations, 2);
        assert_eq!(plan.gates.pass_threshold, 0.55);
        // Missing gate fields keep their defaults.
        assert_eq!(plan.gates.max_risk, defaults::MAX_RISK);
        assert_eq!(plan.calibration.len(), 2);
        assert_eq!(plan.calibration[0].param("a", 0.0), -4.0);
        assert_eq!(plan.calibration[1].phase, CalibrationPhase::PostFusion);
        assert_eq!(plan.total_k, defaults::TOTAL_K);
    }

    #[test]
    fn test_parse_json_profile() {
        let json = r#"{"name":"kg-heavy","order":["kg","web"],"totalK":12,
            "allocation":{"strategy":"risk_aware","temperature":0.7,"aversion":2.0},
            "fusion":{"method":"blend","tailRisk":{"alpha":0.2,"lambda":0.3}}}"#;
        let plan = RetrievalPlan::from_json_str(json).unwrap();
        assert_eq!(plan.total_k, 12);
        assert_eq!(
            plan.allocation,
            AllocationStrategy::RiskAware {
                temperature: 0.7,
                aversion: 2.0
            }
        );
        assert_eq!(plan.fusion.method, FusionMethod::Blend);
        assert_eq!(plan.fusion.tail_risk.unwrap().alpha, 0.2);
    }

    #[test]
    fn test_validate_rejects_duplicate_sources() {
        let plan = RetrievalPlan {
            order: vec!["web".into(), "web".into()],
            ..Default::default()
        };
        assert!(matches!(plan.validate(), Err(Error::InvalidPlan(_))));
    }

    #[test]
    fn test_validate_rejects_empty_order() {
        let plan = RetrievalPlan {
            order: vec![],
            ..Default::default()
        };
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let mut plan = RetrievalPlan::default();
        plan.weights.insert("web".into(), -1.0);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_corrupt_yaml_is_an_error() {
        let result = RetrievalPlan::from_yaml_str("order: [web, vector\nk: {");
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_registry_falls_back_to_default_for_unknown_name() {
        let registry = PlanRegistry::default();
        let plan = registry.resolve(Some("missing"), &RequestOverrides::default());
        assert_eq!(plan.name, defaults::DEFAULT_PROFILE);
    }

    #[test]
    fn test_registry_resolves_registered_profile() {
        let registry = PlanRegistry::default();
        registry.insert_yaml(NEWS_YAML).unwrap();
        assert_eq!(registry.names(), vec!["news".to_string()]);

        let plan = registry.resolve(Some("news"), &RequestOverrides::default());
        assert_eq!(plan.name, "news");
    }

    #[test]
    fn test_registry_rejects_invalid_plan() {
        let registry = PlanRegistry::default();
        let bad = RetrievalPlan {
            name: "bad".into(),
            order: vec![],
            ..Default::default()
        };
        assert!(registry.insert(bad).is_err());
        assert!(registry.get("bad").is_none());
    }

    #[test]
    fn test_overrides_narrow_sources_in_plan_order() {
        let plan = RetrievalPlan::default();
        let overrides = RequestOverrides {
            sources: Some(vec!["kg".into(), "web".into()]),
            total_k: Some(6),
            rerank: Some(false),
            ..Default::default()
        };
        let resolved = plan.with_overrides(&overrides);
        assert_eq!(resolved.order, vec!["web", "kg"]);
        assert_eq!(resolved.total_k, 6);
        assert!(!resolved.rerank.enabled);
    }

    #[test]
    fn test_overrides_with_unknown_sources_keep_order() {
        let plan = RetrievalPlan::default();
        let overrides = RequestOverrides {
            sources: Some(vec!["nope".into()]),
            ..Default::default()
        };
        assert_eq!(plan.with_overrides(&overrides).order, plan.order);
    }

    #[test]
    fn test_priority_and_lookups() {
        let plan = RetrievalPlan::default();
        assert_eq!(plan.priority("web"), 0);
        assert_eq!(plan.priority("kg"), 2);
        assert_eq!(plan.priority("other"), 3);
        assert_eq!(plan.weight("web"), 1.0);
        assert_eq!(plan.floor("web"), defaults::SOURCE_FLOOR);
        assert_eq!(plan.reliability("other"), defaults::SOURCE_RELIABILITY);
    }
}
