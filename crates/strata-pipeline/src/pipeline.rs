//! End-to-end retrieval and ranking for one query.
//!
//! Stage order is fixed: validate, resolve plan, allocate, retrieve,
//! calibrate, fuse, rerank, diversify, gate. Every stage receives the request
//! budget explicitly. Only an invalid query or total evidence starvation
//! fails the request; everything else is recorded as a [`PartialFailure`]
//! and the run continues with what it has.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use strata_core::{
    new_request_id, AllocationStrategy, CrossEncoder, Error, FusedCandidate,
    PartialFailure, PlanRegistry, QualityDecision, RequestOverrides, Result, RetrievalPlan,
    SourceClient, Stage, TimeBudget,
};
use strata_search::{
    allocate, Allocation, Branch, CalibrationContext, CalibrationPlan, DiversitySelector,
    FusionEngine, GateSignals, GatedReranker, LexicalOverlapScorer, QualityGate, RerankOutcome,
    SimilarityMatrix, SkipReason, SourceInput,
};

use crate::breaker::SourceBreaker;
use crate::config::PipelineConfig;
use crate::health::SourceHealth;
use crate::orchestrator::{stale_failures, Retriever, SourceBatch};

/// One query with its per-request options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineRequest {
    pub query: String,
    /// Named plan profile; the configured default when absent.
    pub profile: Option<String>,
    /// Total budget; the configured default when absent.
    pub budget_ms: Option<u64>,
    pub overrides: RequestOverrides,
    /// Caller-supplied evidence signals for the quality gate.
    pub signals: GateSignals,
}

impl PipelineRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_budget_ms(mut self, budget_ms: u64) -> Self {
        self.budget_ms = Some(budget_ms);
        self
    }

    pub fn with_overrides(mut self, overrides: RequestOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_signals(mut self, signals: GateSignals) -> Self {
        self.signals = signals;
        self
    }
}

/// Ranked evidence handed to answer synthesis, with diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub request_id: Uuid,
    /// Name of the plan that actually ran.
    pub profile: String,
    pub candidates: Vec<FusedCandidate>,
    pub decision: QualityDecision,
    pub failures: Vec<PartialFailure>,
    pub rerank: RerankOutcome,
    /// Fusion ran on results that arrived after their source deadline.
    pub used_stale: bool,
    pub elapsed_ms: u64,
}

/// Reject empty, oversized, or control-character queries.
pub fn validate_query(query: &str, max_chars: usize) -> Result<()> {
    if query.trim().is_empty() {
        return Err(Error::InvalidQuery("query is empty".to_string()));
    }
    let chars = query.chars().count();
    if chars > max_chars {
        return Err(Error::InvalidQuery(format!(
            "query has {} characters, limit is {}",
            chars, max_chars
        )));
    }
    if query.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return Err(Error::InvalidQuery(
            "query contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// The retrieval and ranking pipeline.
///
/// Owns its plan registry, source clients, single-flight registry, source
/// health, and reranker gate. Share it behind an `Arc` to serve concurrent
/// requests.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    plans: PlanRegistry,
    retriever: Retriever,
    reranker: GatedReranker,
}

impl Pipeline {
    /// Create a pipeline with no sources and the lexical reranker.
    pub fn new(config: PipelineConfig, plans: PlanRegistry) -> Self {
        let config = config.clamped();
        let reranker = GatedReranker::new(
            Arc::new(LexicalOverlapScorer),
            config.rerank_permits,
            config.rerank_wait(),
        );
        let breaker = SourceBreaker::new(config.breaker_failures, config.breaker_cooldown());
        let retriever =
            Retriever::new(Arc::new(SourceHealth::default())).with_breaker(Arc::new(breaker));
        Self {
            config,
            plans,
            retriever,
            reranker,
        }
    }

    pub fn with_source(mut self, client: Arc<dyn SourceClient>) -> Self {
        self.retriever.register(client);
        self
    }

    /// Replace the reranking model, keeping the configured gate size.
    pub fn with_encoder(mut self, encoder: Arc<dyn CrossEncoder>) -> Self {
        self.reranker = GatedReranker::new(
            encoder,
            self.config.rerank_permits,
            self.config.rerank_wait(),
        );
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn plans(&self) -> &PlanRegistry {
        &self.plans
    }

    pub fn health(&self) -> &SourceHealth {
        self.retriever.health()
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn reranker(&self) -> &GatedReranker {
        &self.reranker
    }

    /// Run with a fresh budget of `request.budget_ms` (or the configured default).
    pub async fn run(&self, request: &PipelineRequest) -> Result<PipelineOutput> {
        let budget_ms = request
            .budget_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(self.config.default_budget_ms);
        self.run_with_budget(request, &TimeBudget::from_millis(budget_ms))
            .await
    }

    /// Run under a caller-owned budget, which the caller may cancel.
    pub async fn run_with_budget(
        &self,
        request: &PipelineRequest,
        budget: &TimeBudget,
    ) -> Result<PipelineOutput> {
        self.execute(new_request_id(), request, budget).await
    }

    #[instrument(skip(self, request, budget), fields(
        request_id = %request_id,
        budget_remaining_ms = budget.remaining_ms(),
    ))]
    async fn execute(
        &self,
        request_id: Uuid,
        request: &PipelineRequest,
        budget: &TimeBudget,
    ) -> Result<PipelineOutput> {
        let started = Instant::now();
        validate_query(&request.query, self.config.max_query_chars)?;
        let query = request.query.trim();

        let plan = self.resolve_plan(request);
        let mut failures = Vec::new();

        let allocation = self.allocate_sources(&plan, &mut failures);

        let retrieval_budget = self.stage_budget(budget, self.config.retrieval_fraction, Stage::Retrieve);
        let retrieval = self
            .retriever
            .retrieve(&plan, &allocation, query, &retrieval_budget)
            .await;

        if retrieval.is_starved() {
            error!(
                profile = %plan.name,
                attempted = retrieval.attempted,
                failures = ?retrieval.failures,
                "Every source failed and no stale results exist"
            );
            return Err(Error::EvidenceStarvation(retrieval.attempted));
        }

        failures.extend(retrieval.failures.iter().cloned());
        failures.extend(stale_failures(&retrieval.stale));
        let (batches, used_stale) = retrieval.into_usable();
        if used_stale {
            warn!(
                profile = %plan.name,
                sources = batches.len(),
                "No fresh results, fusing stale results"
            );
        }

        let ctx = CalibrationContext::default();
        let (calibration, calibration_errors) = CalibrationPlan::from_specs(&plan.calibration);
        failures.extend(
            calibration_errors
                .iter()
                .map(|e| PartialFailure::from_error(Stage::Calibrate, None, e)),
        );
        let branches = calibrated_branches(&plan, &calibration, &ctx, batches);

        let engine = FusionEngine::new(plan.fusion);
        let mut fused = engine.fuse(&branches);
        calibration.calibrate_fused(&mut fused, &ctx, |source| plan.priority(source));
        debug!(
            fusion_method = plan.fusion.method.as_str(),
            rrf_k = plan.fusion.k_rrf,
            branches = branches.len(),
            result_count = fused.len(),
            "Fusion complete"
        );

        let (ranked, rerank) = if plan.rerank.enabled {
            let rerank_budget = self.stage_budget(budget, self.config.rerank_fraction, Stage::Rerank);
            let result = self
                .reranker
                .rerank(query, fused, plan.rerank.top_n, &rerank_budget)
                .await;
            failures.extend(result.failure);
            (result.candidates, result.outcome)
        } else {
            debug!(profile = %plan.name, "Rerank disabled");
            (fused, RerankOutcome::Skipped(SkipReason::Disabled))
        };

        let similarity = SimilarityMatrix::build(ranked.iter().map(|c| &c.candidate));
        let selector = DiversitySelector::new(plan.diversity);
        let (candidates, truncated) = selector.apply(&ranked, &similarity, Some(budget));
        if truncated {
            failures.push(PartialFailure::budget_exhausted(
                Stage::Diversify,
                None,
                "diversity selection cut short, remainder filled by relevance",
            ));
        }

        let decision = QualityGate::new(plan.gates.clone()).decide(&candidates, &request.signals);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            profile = %plan.name,
            result_count = candidates.len(),
            passed = decision.passed,
            failures = failures.len(),
            used_stale,
            duration_ms = elapsed_ms,
            budget_remaining_ms = budget.remaining_ms(),
            "Pipeline complete"
        );

        Ok(PipelineOutput {
            request_id,
            profile: plan.name,
            candidates,
            decision,
            failures,
            rerank,
            used_stale,
            elapsed_ms,
        })
    }

    fn resolve_plan(&self, request: &PipelineRequest) -> RetrievalPlan {
        let configured = self.config.default_profile.as_str();
        let name = request.profile.as_deref().or_else(|| {
            (configured != self.plans.default_plan().name).then_some(configured)
        });
        self.plans.resolve(name, &request.overrides)
    }

    /// Split `plan.total_k`, falling back to floor-free static ratios when the
    /// plan's floors cannot be met.
    ///
    /// Risk-aware plans see each source's observed reliability in place of the
    /// plan's baseline once the source has health samples.
    fn allocate_sources(
        &self,
        plan: &RetrievalPlan,
        failures: &mut Vec<PartialFailure>,
    ) -> Allocation {
        let health = self.retriever.health();
        let inputs: Vec<SourceInput> = plan
            .order
            .iter()
            .map(|source| {
                let baseline = plan.reliability(source);
                let reliability = match plan.allocation {
                    AllocationStrategy::RiskAware { .. } => health.reliability(source, baseline),
                    _ => baseline,
                };
                SourceInput::new(source.as_str(), reliability)
                    .with_floor(plan.floor(source))
                    .with_ratio(plan.k.get(source).copied().unwrap_or(1))
                    .with_failure_rate(health.failure_rate(source))
            })
            .collect();

        match allocate(plan.total_k, &inputs, &plan.allocation) {
            Ok(allocation) => allocation,
            Err(e) => {
                warn!(
                    profile = %plan.name,
                    total_k = plan.total_k,
                    error = %e,
                    "Allocation failed, using static ratios without floors"
                );
                failures.push(PartialFailure::from_error(Stage::Allocate, None, &e));
                let relaxed: Vec<SourceInput> =
                    inputs.into_iter().map(|i| i.with_floor(0)).collect();
                allocate(plan.total_k, &relaxed, &AllocationStrategy::Static).unwrap_or_else(|e| {
                    warn!(error = %e, "Static allocation failed, querying no sources");
                    Allocation::default()
                })
            }
        }
    }

    fn stage_budget(&self, budget: &TimeBudget, fraction: f64, stage: Stage) -> TimeBudget {
        budget.child(fraction).unwrap_or_else(|e| {
            warn!(stage = stage.as_str(), error = %e, "Invalid stage fraction, using full budget");
            budget.child_capped(budget.remaining())
        })
    }
}

/// Calibrate each batch and wrap it as a fusion branch, keeping plan order.
fn calibrated_branches(
    plan: &RetrievalPlan,
    calibration: &CalibrationPlan,
    ctx: &CalibrationContext,
    batches: Vec<SourceBatch>,
) -> Vec<Branch> {
    batches
        .into_iter()
        .map(|batch| {
            let SourceBatch {
                source,
                mut candidates,
                ..
            } = batch;
            calibration.calibrate_branch(&source, &mut candidates, ctx);
            let weight = plan.weight(&source);
            Branch::new(source, weight, candidates)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FailingSource, StaticSource};
    use strata_core::{Candidate, ErrorKind};

    fn pipeline_with(plans: PlanRegistry) -> Pipeline {
        let docs = |source: &str| {
            (0..4)
                .map(|i| {
                    Candidate::new(format!("{source}-{i}"), source, i + 1, 1.0 - i as f64 * 0.2)
                        .with_snippet(format!("{source} document {i}"))
                })
                .collect::<Vec<_>>()
        };
        Pipeline::new(PipelineConfig::default(), plans)
            .with_source(Arc::new(StaticSource::new("web", docs("web"))))
            .with_source(Arc::new(StaticSource::new("vector", docs("vector"))))
            .with_source(Arc::new(StaticSource::new("kg", docs("kg"))))
    }

    #[test]
    fn test_validate_query() {
        assert!(validate_query("rust borrow checker", 100).is_ok());
        assert!(matches!(validate_query("   ", 100), Err(Error::InvalidQuery(_))));
        assert!(matches!(validate_query("abcdef", 5), Err(Error::InvalidQuery(_))));
        assert!(matches!(validate_query("a\u{0}b", 100), Err(Error::InvalidQuery(_))));
        assert!(validate_query("line one\nline two", 100).is_ok());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: PipelineRequest =
            serde_json::from_str(r#"{"query": "q", "overrides": {"rerank": false}}"#).unwrap();
        assert_eq!(request.query, "q");
        assert_eq!(request.overrides.rerank, Some(false));
        assert!(request.profile.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_floor_overflow_falls_back_to_static_allocation() {
        let pipeline = pipeline_with(PlanRegistry::default());
        let request = PipelineRequest::new("document").with_overrides(RequestOverrides {
            total_k: Some(3),
            ..Default::default()
        });

        let output = pipeline.run(&request).await.unwrap();
        let allocate_failures: Vec<_> = output
            .failures
            .iter()
            .filter(|f| f.stage == Stage::Allocate)
            .collect();
        assert_eq!(allocate_failures.len(), 1);
        assert_eq!(allocate_failures[0].error_kind, ErrorKind::InvalidPlan);
        assert!(!output.candidates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_default_profile_is_used() {
        let plans = PlanRegistry::default();
        plans
            .insert(RetrievalPlan {
                name: "web-only".to_string(),
                order: vec!["web".to_string()],
                ..Default::default()
            })
            .unwrap();
        let config = PipelineConfig {
            default_profile: "web-only".to_string(),
            ..Default::default()
        };
        let docs = vec![Candidate::new("w", "web", 1, 0.9).with_snippet("web text")];
        let pipeline = Pipeline::new(config, plans)
            .with_source(Arc::new(StaticSource::new("web", docs)));

        let output = pipeline.run(&PipelineRequest::new("text")).await.unwrap();
        assert_eq!(output.profile, "web-only");
        assert_eq!(output.candidates[0].id(), "w");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_calibration_entry_is_recorded() {
        let plans = PlanRegistry::new(RetrievalPlan {
            calibration: vec![strata_core::CalibrationSpec::new("web", "no-such-method")],
            ..Default::default()
        });
        let output = pipeline_with(plans)
            .run(&PipelineRequest::new("document"))
            .await
            .unwrap();
        assert!(output
            .failures
            .iter()
            .any(|f| f.stage == Stage::Calibrate));
        assert!(!output.candidates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_risk_aware_allocation_uses_observed_reliability() {
        let plan = RetrievalPlan {
            order: vec!["web".to_string(), "vector".to_string()],
            floors: [("web", 0), ("vector", 0)]
                .into_iter()
                .map(|(s, f)| (s.to_string(), f))
                .collect(),
            total_k: 10,
            allocation: AllocationStrategy::RiskAware {
                temperature: 0.5,
                aversion: 1.0,
            },
            ..Default::default()
        };
        let docs = (0..10)
            .map(|i| Candidate::new(format!("w{i}"), "web", i + 1, 0.9).with_snippet("web text"))
            .collect();
        let pipeline = Pipeline::new(PipelineConfig::default(), PlanRegistry::new(plan.clone()))
            .with_source(Arc::new(StaticSource::new("web", docs)))
            .with_source(Arc::new(FailingSource::new("vector", "index offline")));

        let mut failures = Vec::new();
        let before = pipeline.allocate_sources(&plan, &mut failures);
        pipeline.run(&PipelineRequest::new("web text")).await.unwrap();
        let after = pipeline.allocate_sources(&plan, &mut failures);

        assert!(failures.is_empty());
        assert_eq!(pipeline.health().reliability("vector", 0.7), 0.0);
        assert!(before.get("vector") > 0);
        assert!(after.get("vector") < before.get("vector"));
        assert_eq!(after.total(), 10);
    }
}
