//! Concurrent fan-out to retrieval sources.
//!
//! Each selected source is queried on its own task behind single-flight,
//! with a child budget capped at the plan's per-source timeout. Callers wait
//! no longer than the retrieval budget; whatever is still pending then is
//! recorded as a timeout. A result that lands after its source's own deadline
//! is kept aside as stale and only used when nothing fresh arrived.
//!
//! The backend call itself is bounded by the retrieval deadline of the
//! request that started it, so a hung source gives up its single-flight key
//! once no caller of that round could still use the answer. Each call is
//! reported to source health and the circuit breaker exactly once, by the
//! task that made it. Sources whose circuit is open are not called.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use strata_core::{
    Candidate, Error, PartialFailure, RetrievalPlan, SourceClient, Stage, TimeBudget,
};
use strata_search::Allocation;

use crate::breaker::{Admission, SourceBreaker};
use crate::health::{CallOutcome, SourceHealth};
use crate::single_flight::{flight_key, SingleFlight};

/// Candidates returned by one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBatch {
    pub source: String,
    pub candidates: Vec<Candidate>,
    pub elapsed_ms: u64,
    /// Served by an execution another request started.
    pub shared: bool,
}

/// Everything one retrieval round produced.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    /// Batches that arrived within their source deadline, in plan order.
    pub fresh: Vec<SourceBatch>,
    /// Batches that arrived after their source deadline, in plan order.
    pub stale: Vec<SourceBatch>,
    pub failures: Vec<PartialFailure>,
    /// Sources queried or found unavailable (sources with K = 0 are not counted).
    pub attempted: usize,
}

impl Retrieval {
    /// Every attempted source failed and nothing, not even a stale batch, came back.
    pub fn is_starved(&self) -> bool {
        self.attempted > 0 && self.fresh.is_empty() && self.stale.is_empty()
    }

    /// Batches to fuse: fresh ones, or stale ones when nothing fresh arrived.
    ///
    /// The flag reports whether stale batches were used.
    pub fn into_usable(self) -> (Vec<SourceBatch>, bool) {
        if self.fresh.is_empty() && !self.stale.is_empty() {
            (self.stale, true)
        } else {
            (self.fresh, false)
        }
    }
}

enum Arrival {
    Fresh(SourceBatch),
    Stale(SourceBatch),
    Failed(PartialFailure),
}

/// Registered source clients plus the shared single-flight registry.
pub struct Retriever {
    sources: HashMap<String, Arc<dyn SourceClient>>,
    flights: SingleFlight<Vec<Candidate>>,
    health: Arc<SourceHealth>,
    breaker: Arc<SourceBreaker>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Retriever")
            .field("sources", &names)
            .field("flights", &self.flights)
            .finish()
    }
}

impl Retriever {
    pub fn new(health: Arc<SourceHealth>) -> Self {
        Self {
            sources: HashMap::new(),
            flights: SingleFlight::new(),
            health,
            breaker: Arc::new(SourceBreaker::default()),
        }
    }

    pub fn with_breaker(mut self, breaker: Arc<SourceBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Register a client under its own name, replacing any previous one.
    pub fn register(&mut self, client: Arc<dyn SourceClient>) {
        self.sources.insert(client.name().to_string(), client);
    }

    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn health(&self) -> &Arc<SourceHealth> {
        &self.health
    }

    pub fn breaker(&self) -> &Arc<SourceBreaker> {
        &self.breaker
    }

    pub fn flights(&self) -> &SingleFlight<Vec<Candidate>> {
        &self.flights
    }

    /// Query every plan source with a non-zero allocation.
    ///
    /// Never fails: per-source problems become [`PartialFailure`] records.
    /// Returns once every source has answered or `budget` expires.
    #[instrument(skip(self, plan, allocation, budget), fields(
        stage = "retrieve",
        profile = %plan.name,
        budget_remaining_ms = budget.remaining_ms(),
    ))]
    pub async fn retrieve(
        &self,
        plan: &RetrievalPlan,
        allocation: &Allocation,
        query: &str,
        budget: &TimeBudget,
    ) -> Retrieval {
        let mut retrieval = Retrieval::default();
        let mut pending = FuturesUnordered::new();

        for source in &plan.order {
            let k = allocation.get(source);
            if k == 0 {
                debug!(source = %source, "Source allocated K=0, skipping");
                continue;
            }
            retrieval.attempted += 1;

            let Some(client) = self.sources.get(source) else {
                let err = Error::SourceError {
                    source_name: source.clone(),
                    message: "no client registered".to_string(),
                };
                warn!(source = %source, "Plan source has no registered client");
                retrieval
                    .failures
                    .push(PartialFailure::from_error(Stage::Retrieve, Some(source), &err));
                continue;
            };

            if let Admission::Rejected { retry_after } = self.breaker.admit(source) {
                let err = Error::SourceUnavailable {
                    source_name: source.clone(),
                    retry_after_ms: retry_after.as_millis() as u64,
                };
                debug!(
                    source = %source,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Circuit open, skipping source"
                );
                retrieval
                    .failures
                    .push(PartialFailure::from_error(Stage::Retrieve, Some(source), &err));
                continue;
            }

            let child = budget.child_capped(plan.timeout(source));
            pending.push(self.fetch(Arc::clone(client), source, k, query, budget, child));
        }

        while let Some(arrival) = pending.next().await {
            match arrival {
                Arrival::Fresh(batch) => retrieval.fresh.push(batch),
                Arrival::Stale(batch) => retrieval.stale.push(batch),
                Arrival::Failed(failure) => retrieval.failures.push(failure),
            }
        }

        retrieval.fresh.sort_by_key(|b| plan.priority(&b.source));
        retrieval.stale.sort_by_key(|b| plan.priority(&b.source));

        debug!(
            attempted = retrieval.attempted,
            fresh = retrieval.fresh.len(),
            stale = retrieval.stale.len(),
            failed = retrieval.failures.len(),
            "Retrieval complete"
        );
        retrieval
    }

    async fn fetch(
        &self,
        client: Arc<dyn SourceClient>,
        source: &str,
        k: usize,
        query: &str,
        wait_budget: &TimeBudget,
        source_budget: TimeBudget,
    ) -> Arrival {
        let started = Instant::now();
        let key = flight_key(source, query, k);
        let call = SourceCall {
            client,
            health: Arc::clone(&self.health),
            breaker: Arc::clone(&self.breaker),
            query: query.to_string(),
            k,
            bound: wait_budget.remaining(),
            source_budget: source_budget.clone(),
        };

        let flight = self.flights.run(&key, wait_budget, call.run()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (result, shared) = match flight {
            Ok(flight) => (flight.result, flight.shared),
            Err(_) => {
                let err = Error::SourceTimeout {
                    source_name: source.to_string(),
                    elapsed_ms,
                };
                warn!(source, elapsed_ms, "Source still pending at retrieval deadline");
                return Arrival::Failed(PartialFailure::from_error(
                    Stage::Retrieve,
                    Some(source),
                    &err,
                ));
            }
        };

        let candidates = match result.as_ref() {
            Ok(candidates) => normalize_batch(source, k, candidates),
            Err(e) => {
                warn!(source, error = %e, error_kind = %e.kind(), "Source failed");
                return Arrival::Failed(PartialFailure::from_error(Stage::Retrieve, Some(source), e));
            }
        };

        let batch = SourceBatch {
            source: source.to_string(),
            candidates,
            elapsed_ms,
            shared,
        };

        if source_budget.expired() {
            warn!(
                source,
                elapsed_ms,
                result_count = batch.candidates.len(),
                "Source answered after its deadline, keeping result as stale"
            );
            return Arrival::Stale(batch);
        }

        debug!(
            source,
            k,
            shared,
            elapsed_ms,
            result_count = batch.candidates.len(),
            "Source answered"
        );
        Arrival::Fresh(batch)
    }
}

/// One backend call, run on the single-flight task.
struct SourceCall {
    client: Arc<dyn SourceClient>,
    health: Arc<SourceHealth>,
    breaker: Arc<SourceBreaker>,
    query: String,
    k: usize,
    /// Longest the call may run before it is abandoned.
    bound: Duration,
    source_budget: TimeBudget,
}

impl SourceCall {
    async fn run(self) -> strata_core::Result<Vec<Candidate>> {
        let started = Instant::now();
        let source = self.client.name().to_string();
        let timeout = self.source_budget.remaining();

        let result = match tokio::time::timeout(
            self.bound,
            self.client.search(&self.query, self.k, timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    source = %source,
                    bound_ms = self.bound.as_millis() as u64,
                    "Abandoning source call"
                );
                Err(Error::SourceTimeout {
                    source_name: source.clone(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
        };

        let outcome = match &result {
            Ok(_) if self.source_budget.expired() => CallOutcome::Timeout,
            Ok(_) => CallOutcome::Ok,
            Err(Error::SourceTimeout { .. }) | Err(Error::BudgetExhausted(_)) => CallOutcome::Timeout,
            Err(_) => CallOutcome::Error,
        };
        self.health.record(&source, started.elapsed(), outcome);
        self.breaker.record(&source, outcome);
        result
    }
}

/// Truncate to `k` and stamp source name and 1-based list position.
fn normalize_batch(source: &str, k: usize, candidates: &[Candidate]) -> Vec<Candidate> {
    candidates
        .iter()
        .take(k)
        .enumerate()
        .map(|(idx, c)| {
            let mut c = c.clone();
            c.source_name = source.to_string();
            c.source_rank = idx + 1;
            c
        })
        .collect()
}

/// Stale batches as diagnostics, one per source.
pub fn stale_failures(stale: &[SourceBatch]) -> Vec<PartialFailure> {
    stale
        .iter()
        .map(|b| {
            PartialFailure::budget_exhausted(
                Stage::Retrieve,
                Some(&b.source),
                format!("{} answered after its deadline ({}ms)", b.source, b.elapsed_ms),
            )
        })
        .collect()
}
