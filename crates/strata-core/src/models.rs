//! Data model shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, ErrorKind};

// =============================================================================
// SCORED CAPABILITY
// =============================================================================

/// Anything the ranking stages can order.
///
/// Stages that only need an identity and a relevance value (diversity
/// selection, gating) are generic over this instead of a concrete type.
pub trait Scored {
    /// Stable identity used for deduplication and tie-breaking.
    fn id(&self) -> &str;

    /// Current relevance on the stage's working scale.
    fn score(&self) -> f64;
}

// =============================================================================
// CANDIDATE
// =============================================================================

/// A single retrieval hit as produced by a source client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Stable identity across sources (URL, document key, node id).
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    /// Source that produced this hit.
    pub source_name: String,
    /// Score on the source's native scale.
    pub raw_score: f64,
    /// 1-based position within the source's list.
    pub source_rank: usize,
    /// Working score on the common [0,1] scale; rewritten by calibration.
    #[serde(default)]
    pub score: f64,
    /// Publication time, used by recency calibration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Trust tier label ("official", "wiki", "blog"...), used by authority calibration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_tier: Option<String>,
    /// Dense embedding, when the source returns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Candidate {
    /// Create a candidate whose working score starts at the raw score.
    pub fn new(
        id: impl Into<String>,
        source_name: impl Into<String>,
        source_rank: usize,
        raw_score: f64,
    ) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            snippet: String::new(),
            source_name: source_name.into(),
            raw_score,
            source_rank,
            score: raw_score,
            published_at: None,
            authority_tier: None,
            embedding: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    pub fn with_authority_tier(mut self, tier: impl Into<String>) -> Self {
        self.authority_tier = Some(tier.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Text used by lexical similarity and lexical reranking.
    pub fn text(&self) -> String {
        if self.snippet.is_empty() {
            self.title.clone()
        } else if self.title.is_empty() {
            self.snippet.clone()
        } else {
            format!("{} {}", self.title, self.snippet)
        }
    }
}

impl Scored for Candidate {
    fn id(&self) -> &str {
        &self.id
    }

    fn score(&self) -> f64 {
        self.score
    }
}

// =============================================================================
// FUSED CANDIDATE
// =============================================================================

/// A candidate after fusion, carrying its position in the merged list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedCandidate {
    /// The first-seen copy of the candidate (earliest branch in plan order).
    #[serde(flatten)]
    pub candidate: Candidate,
    /// Combined score (RRF scale, or [0,1] when normalized).
    pub fused_score: f64,
    /// 1-based position after sorting by `fused_score`.
    pub fused_rank: usize,
    /// Cross-encoder score, when reranking ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
    /// Branches in which this candidate appeared, in plan order.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Best (lowest) source rank across branches.
    pub min_source_rank: usize,
}

impl FusedCandidate {
    pub fn id(&self) -> &str {
        &self.candidate.id
    }
}

impl Scored for FusedCandidate {
    fn id(&self) -> &str {
        &self.candidate.id
    }

    fn score(&self) -> f64 {
        self.rerank_score.unwrap_or(self.fused_score)
    }
}

/// Reassign contiguous 1-based ranks in list order.
pub fn assign_ranks(candidates: &mut [FusedCandidate]) {
    for (idx, c) in candidates.iter_mut().enumerate() {
        c.fused_rank = idx + 1;
    }
}

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// Pipeline stage, used to attribute diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Allocate,
    Retrieve,
    Calibrate,
    Fuse,
    Rerank,
    Diversify,
    Gate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Allocate => "allocate",
            Stage::Retrieve => "retrieve",
            Stage::Calibrate => "calibrate",
            Stage::Fuse => "fuse",
            Stage::Rerank => "rerank",
            Stage::Diversify => "diversify",
            Stage::Gate => "gate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded, non-fatal failure attached to the request diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialFailure {
    pub stage: Stage,
    /// Source the failure belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub error_kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl PartialFailure {
    /// Record an error against a stage.
    pub fn from_error(stage: Stage, source: Option<&str>, err: &Error) -> Self {
        Self {
            stage,
            source: source.map(str::to_string),
            error_kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    /// The stage ran out of time and returned partial output.
    pub fn budget_exhausted(stage: Stage, source: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            stage,
            source: source.map(str::to_string),
            error_kind: ErrorKind::BudgetExhausted,
            message: message.into(),
            retryable: false,
        }
    }
}

// =============================================================================
// QUALITY DECISION
// =============================================================================

/// Name of a quality check that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCheck {
    /// Fewer citable candidates than the plan requires.
    Citations,
    /// Sigmoid-combined evidence score below the pass threshold.
    Sigmoid,
    /// Risk signal above the acceptable limit.
    Risk,
}

impl GateCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateCheck::Citations => "citations",
            GateCheck::Sigmoid => "sigmoid",
            GateCheck::Risk => "risk",
        }
    }
}

/// Final pass/fail decision with itemized reasons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityDecision {
    pub passed: bool,
    pub citations_ok: bool,
    pub sigmoid_score: f64,
    /// Failed checks, in evaluation order. Empty when `passed`.
    pub reasons: Vec<GateCheck>,
}

/// Generate a time-ordered request correlation id.
pub fn new_request_id() -> Uuid {
    Uuid::now_v7()
}
