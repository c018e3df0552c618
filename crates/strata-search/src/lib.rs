//! # strata-search
//!
//! Ranking math for the strata retrieval pipeline.
//!
//! This crate provides:
//! - Per-source K allocation (softmax over reliability, static ratios, risk-aware)
//! - Score calibration chains (Platt, isotonic, temperature, recency, authority)
//! - Multi-branch fusion (weighted RRF, power mean, CVaR tail-risk)
//! - Diversity selection (MMR and greedy DPP) over embedding or lexical similarity
//! - Concurrency-gated cross-encoder reranking
//! - The final quality gate
//!
//! ## Example
//!
//! ```
//! use strata_search::{Branch, FusionEngine, FusionSettings};
//! use strata_core::Candidate;
//!
//! let engine = FusionEngine::new(FusionSettings::default());
//! let fused = engine.fuse(&[
//!     Branch::new("web", 1.0, vec![Candidate::new("a", "web", 1, 3.2)]),
//!     Branch::new("vector", 1.0, vec![Candidate::new("a", "vector", 1, 0.8)]),
//! ]);
//! assert_eq!(fused.len(), 1);
//! assert_eq!(fused[0].fused_rank, 1);
//! ```

pub mod allocator;
pub mod calibration;
pub mod diversity;
pub mod dpp;
pub mod fusion;
pub mod mmr;
pub mod power_mean;
pub mod quality_gate;
pub mod rerank;
pub mod rrf;
pub mod similarity;
pub mod tail_risk;

// Re-export core types
pub use strata_core::*;

// Re-export search types
pub use allocator::{allocate, softmax_weights, Allocation, SourceInput};
pub use calibration::{
    build_calibrator, clamp01, CalibrationChain, CalibrationContext, CalibrationPlan, Calibrator,
};
pub use diversity::{DiversitySelector, Selection};
pub use fusion::{sort_fused, Branch, FusionEngine};
pub use quality_gate::{GateSignals, QualityGate, ResolvedSignals};
pub use rerank::{GatedReranker, LexicalOverlapScorer, RerankOutcome, RerankResult, SkipReason};
pub use similarity::SimilarityMatrix;
