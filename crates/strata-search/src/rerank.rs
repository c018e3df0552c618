//! Concurrency-gated cross-encoder reranking.
//!
//! Reranking is admitted only when a bounded-concurrency permit is granted
//! within `min(max_wait, budget.remaining() / 2)` and the budget is still
//! live. Denial is a logged degradation: the fused order passes through
//! unchanged. On admission the top `top_n` candidates are scored and
//! re-sorted; the unscored tail follows in fused order, so the output always
//! has as many candidates as the input.
//!
//! The semaphore is the only shared mutable resource in the ranking path.
//! Permits are RAII guards and are released on every exit path.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use strata_core::defaults;
use strata_core::{
    assign_ranks, CrossEncoder, Error, FusedCandidate, PartialFailure, Result, Stage, TimeBudget,
};

use crate::fusion::score_desc;
use crate::similarity::token_signature;

/// Why reranking did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Disabled by plan or request.
    Disabled,
    /// Nothing to rerank.
    Empty,
    /// Budget was gone before or at admission.
    BudgetExpired,
    /// No permit within the allowed wait.
    GateTimeout,
}

/// Outcome of one rerank call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankOutcome {
    Reranked { scored: usize },
    Skipped(SkipReason),
    /// Admitted, but the encoder failed or ran out of time.
    Failed,
}

/// Candidates after reranking plus the outcome and any diagnostic.
#[derive(Debug, Clone)]
pub struct RerankResult {
    pub candidates: Vec<FusedCandidate>,
    pub outcome: RerankOutcome,
    pub failure: Option<PartialFailure>,
}

impl RerankResult {
    fn pass_through(
        candidates: Vec<FusedCandidate>,
        outcome: RerankOutcome,
        failure: Option<PartialFailure>,
    ) -> Self {
        Self {
            candidates,
            outcome,
            failure,
        }
    }
}

/// Reranker behind a bounded-concurrency gate.
///
/// Clone shares the gate.
#[derive(Clone)]
pub struct GatedReranker {
    encoder: Arc<dyn CrossEncoder>,
    gate: Arc<Semaphore>,
    permits: usize,
    max_wait: Duration,
}

impl std::fmt::Debug for GatedReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatedReranker")
            .field("encoder", &self.encoder.name())
            .field("permits", &self.permits)
            .field("available", &self.gate.available_permits())
            .field("max_wait", &self.max_wait)
            .finish()
    }
}

impl GatedReranker {
    /// Create a gate with `permits` concurrent admissions (at least one).
    pub fn new(encoder: Arc<dyn CrossEncoder>, permits: usize, max_wait: Duration) -> Self {
        let permits = permits.max(1);
        Self {
            encoder,
            gate: Arc::new(Semaphore::new(permits)),
            permits,
            max_wait,
        }
    }

    /// Gate with default permits and wait.
    pub fn with_defaults(encoder: Arc<dyn CrossEncoder>) -> Self {
        Self::new(
            encoder,
            defaults::RERANK_PERMITS,
            Duration::from_millis(defaults::RERANK_WAIT_MS),
        )
    }

    /// Permits currently free.
    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    pub fn encoder_name(&self) -> &str {
        self.encoder.name()
    }

    /// Rerank the top `top_n` of `candidates` if admitted.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<FusedCandidate>,
        top_n: usize,
        budget: &TimeBudget,
    ) -> RerankResult {
        if candidates.is_empty() || top_n == 0 {
            return RerankResult::pass_through(
                candidates,
                RerankOutcome::Skipped(SkipReason::Empty),
                None,
            );
        }
        if budget.expired() {
            return self.denied(candidates, SkipReason::BudgetExpired, "budget expired before admission");
        }

        let wait = self.max_wait.min(budget.remaining() / 2);
        let permit = match tokio::time::timeout(wait, Arc::clone(&self.gate).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return self.denied(candidates, SkipReason::GateTimeout, "rerank gate closed");
            }
            Err(_) => {
                return self.denied(
                    candidates,
                    SkipReason::GateTimeout,
                    &format!("no rerank permit within {}ms", wait.as_millis()),
                );
            }
        };

        if budget.expired() {
            drop(permit);
            return self.denied(candidates, SkipReason::BudgetExpired, "budget expired at admission");
        }

        let head_len = top_n.min(candidates.len());
        let start = Instant::now();
        let scored = budget
            .run(self.encoder.score(query, &candidates[..head_len]))
            .await;
        drop(permit);

        let scores = match scored {
            Ok(Ok(scores)) if scores.len() == head_len => scores,
            Ok(Ok(scores)) => {
                let err = Error::Internal(format!(
                    "cross-encoder returned {} scores for {} candidates",
                    scores.len(),
                    head_len
                ));
                return self.failed(candidates, &err);
            }
            Ok(Err(e)) | Err(e) => return self.failed(candidates, &e),
        };

        let mut head = candidates;
        let tail = head.split_off(head_len);
        for (candidate, score) in head.iter_mut().zip(scores) {
            candidate.rerank_score = Some(if score.is_finite() { score } else { 0.0 });
        }
        head.sort_by(|a, b| {
            score_desc(
                a.rerank_score.unwrap_or(f64::NEG_INFINITY),
                b.rerank_score.unwrap_or(f64::NEG_INFINITY),
            )
            .then(a.fused_rank.cmp(&b.fused_rank))
        });
        head.extend(tail);
        assign_ranks(&mut head);

        debug!(
            encoder = self.encoder.name(),
            scored = head_len,
            result_count = head.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Rerank complete"
        );

        RerankResult {
            candidates: head,
            outcome: RerankOutcome::Reranked { scored: head_len },
            failure: None,
        }
    }

    fn denied(&self, candidates: Vec<FusedCandidate>, reason: SkipReason, message: &str) -> RerankResult {
        warn!(
            stage = Stage::Rerank.as_str(),
            reason = ?reason,
            "Rerank skipped, passing fused order through: {}",
            message
        );
        let failure = match reason {
            SkipReason::BudgetExpired => {
                PartialFailure::budget_exhausted(Stage::Rerank, None, message)
            }
            _ => PartialFailure::from_error(Stage::Rerank, None, &Error::GateDenied(message.to_string())),
        };
        RerankResult::pass_through(candidates, RerankOutcome::Skipped(reason), Some(failure))
    }

    fn failed(&self, candidates: Vec<FusedCandidate>, err: &Error) -> RerankResult {
        warn!(
            stage = Stage::Rerank.as_str(),
            encoder = self.encoder.name(),
            error = %err,
            "Rerank failed, passing fused order through"
        );
        RerankResult::pass_through(
            candidates,
            RerankOutcome::Failed,
            Some(PartialFailure::from_error(Stage::Rerank, None, err)),
        )
    }
}

/// Cross-encoder stand-in scoring query term overlap.
///
/// Score is the fraction of distinct query terms present in the candidate's
/// title and snippet, in `[0,1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalOverlapScorer;

impl LexicalOverlapScorer {
    pub fn overlap(query: &str, text: &str) -> f64 {
        let query_terms = token_signature(query);
        if query_terms.is_empty() {
            return 0.0;
        }
        let doc_terms: HashSet<u64> = token_signature(text);
        let hits = query_terms.intersection(&doc_terms).count();
        hits as f64 / query_terms.len() as f64
    }
}

#[async_trait]
impl CrossEncoder for LexicalOverlapScorer {
    fn name(&self) -> &str {
        "lexical-overlap"
    }

    async fn score(&self, query: &str, candidates: &[FusedCandidate]) -> Result<Vec<f64>> {
        Ok(candidates
            .iter()
            .map(|c| Self::overlap(query, &c.candidate.text()))
            .collect())
    }
}
