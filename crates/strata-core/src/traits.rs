//! Collaborator interfaces consumed by the pipeline.
//!
//! Retrieval backends and rerank models live outside this workspace; the
//! pipeline only sees them through these traits.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::models::{Candidate, FusedCandidate};

/// A retrieval backend (web search, vector index, graph store...).
///
/// Implementations must return `Ok(vec![])` for an ordinary empty result and
/// should return within `timeout`; callers treat a late return as timed out.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Stable source identifier, matching the plan's `order` entries.
    fn name(&self) -> &str;

    /// Fetch up to `k` candidates for `query`, ranked best-first.
    async fn search(&self, query: &str, k: usize, timeout: Duration) -> Result<Vec<Candidate>>;
}

/// Scores `(query, candidate)` pairs for reranking.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Model identifier for logging.
    fn name(&self) -> &str;

    /// Return one relevance score per candidate, in input order.
    async fn score(&self, query: &str, candidates: &[FusedCandidate]) -> Result<Vec<f64>>;
}
