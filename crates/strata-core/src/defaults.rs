//! Centralized default constants for the strata pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Plans, profiles, and configs fall back to these when a field is missing.
//!
//! Organized by pipeline stage.

// =============================================================================
// BUDGET
// =============================================================================

/// Total request budget when the caller supplies none.
pub const BUDGET_MS: u64 = 2_500;

/// Share of the request budget handed to retrieval.
pub const RETRIEVAL_FRACTION: f64 = 0.6;

/// Share of the remaining budget handed to the reranker.
pub const RERANK_FRACTION: f64 = 0.5;

/// Per-source timeout used when a plan has no entry for a source.
pub const SOURCE_TIMEOUT_MS: u64 = 1_200;

// =============================================================================
// QUERY VALIDATION
// =============================================================================

/// Maximum accepted query length in characters.
pub const MAX_QUERY_CHARS: usize = 2_048;

// =============================================================================
// ALLOCATION
// =============================================================================

/// Total number of candidates requested across all sources.
pub const TOTAL_K: usize = 24;

/// Softmax temperature over source reliability.
pub const ALLOCATION_TEMPERATURE: f64 = 0.8;

/// Minimum K per selected source.
pub const SOURCE_FLOOR: usize = 2;

/// Reliability assumed for a source with neither samples nor plan entry.
pub const SOURCE_RELIABILITY: f64 = 0.5;

/// Penalty multiplier on failure rate for risk-aware allocation.
pub const RISK_AVERSION: f64 = 1.0;

// =============================================================================
// FUSION
// =============================================================================

/// Reciprocal rank fusion constant.
///
/// K=60 is the Cormack et al. (2009) value; it flattens the contribution
/// curve so deep hits from several sources can outrank a single top hit.
pub const RRF_K: f64 = 60.0;

/// Exponent for the weighted power mean (1.0 = arithmetic).
pub const POWER_MEAN_P: f64 = 1.0;

/// Worst fraction of per-branch scores averaged by the tail-risk term.
pub const CVAR_ALPHA: f64 = 0.10;

/// Mixing weight of the tail-risk term.
pub const CVAR_LAMBDA: f64 = 0.25;

// =============================================================================
// CALIBRATION
// =============================================================================

/// Lower bound of the pass-through compressor.
pub const COMPRESSOR_OFFSET: f64 = 0.1;

/// Span of the pass-through compressor.
pub const COMPRESSOR_SPAN: f64 = 0.8;

/// Half-life for recency decay, in days.
pub const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;

/// Floor of the recency multiplier; old documents keep at least this share.
pub const RECENCY_FLOOR: f64 = 0.5;

// =============================================================================
// RERANK
// =============================================================================

/// Concurrent reranker admissions.
pub const RERANK_PERMITS: usize = 2;

/// Maximum wait for a reranker permit.
pub const RERANK_WAIT_MS: u64 = 150;

/// Number of top candidates sent to the reranker.
pub const RERANK_TOP_N: usize = 20;

// =============================================================================
// DIVERSITY
// =============================================================================

/// MMR relevance/diversity tradeoff.
pub const MMR_LAMBDA: f64 = 0.7;

/// Diagonal jitter added to the DPP kernel.
pub const DPP_EPSILON: f64 = 1e-6;

/// Number of candidates kept after diversity selection.
pub const OUTPUT_K: usize = 8;

// =============================================================================
// QUALITY GATE
// =============================================================================

/// Hard minimum of citable candidates.
pub const MIN_CITATIONS: usize = 3;

/// Sigmoid steepness.
pub const SIGMOID_K: f64 = 6.0;

/// Sigmoid midpoint.
pub const SIGMOID_X0: f64 = 0.5;

/// Minimum sigmoid score to pass.
pub const PASS_THRESHOLD: f64 = 0.5;

/// Evidence count at which the evidence term reaches ~63% saturation.
pub const EVIDENCE_SATURATION: f64 = 4.0;

/// Highest acceptable risk signal.
pub const MAX_RISK: f64 = 0.7;

// =============================================================================
// SOURCE HEALTH
// =============================================================================

/// Samples retained per source for latency and failure statistics.
pub const HEALTH_WINDOW: usize = 200;

/// Consecutive failed calls that open a source's circuit.
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit rejects calls before admitting a trial call.
pub const BREAKER_COOLDOWN_MS: u64 = 30_000;

/// Name of the built-in fallback profile.
pub const DEFAULT_PROFILE: &str = "default";
