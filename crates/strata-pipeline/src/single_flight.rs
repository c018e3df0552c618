//! In-flight deduplication of identical source lookups.
//!
//! Concurrent calls for the same key collapse into one execution and every
//! caller observes the same `Arc`'d result. The work runs on its own task, so
//! a caller whose budget runs out stops waiting without cancelling the call
//! for the others. An entry is removed the moment its work finishes, success
//! or error; this is not a result cache.

use futures::future::{BoxFuture, FutureExt, Shared};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use strata_core::{Error, Result, TimeBudget};

type FlightFuture<T> = Shared<BoxFuture<'static, Arc<Result<T>>>>;
type EntryMap<T> = Arc<Mutex<HashMap<String, Entry<T>>>>;

struct Entry<T> {
    generation: u64,
    created_at: Instant,
    future: FlightFuture<T>,
}

/// What one caller observed.
#[derive(Debug)]
pub struct Flight<T> {
    /// The result, shared with every caller of the same execution.
    pub result: Arc<Result<T>>,
    /// This caller joined an execution started by another caller.
    pub shared: bool,
}

/// Lowercase and collapse whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Key for a `(source, normalized query, k)` lookup.
pub fn flight_key(source: &str, query: &str, k: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hasher.update((k as u64).to_le_bytes());
    let hash = hex::encode(hasher.finalize());
    format!("{}:{}", source, &hash[..16])
}

/// Registry of in-flight executions keyed by string.
pub struct SingleFlight<T> {
    entries: EntryMap<T>,
    generation: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }
}

impl<T> fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &lock(&self.entries).len())
            .finish()
    }
}

fn lock<T>(entries: &EntryMap<T>) -> MutexGuard<'_, HashMap<String, Entry<T>>> {
    entries.lock().unwrap_or_else(|e| e.into_inner())
}

fn remove_if_current<T>(entries: &EntryMap<T>, key: &str, generation: u64) {
    let mut map = lock(entries);
    if map.get(key).is_some_and(|e| e.generation == generation) {
        map.remove(key);
    }
}

impl<T> SingleFlight<T>
where
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an execution for `key` is currently running.
    pub fn contains(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Run `work` under `key`, or join the execution already running.
    ///
    /// The wait is bounded by `budget`; on expiry this caller gets
    /// [`Error::BudgetExhausted`] while the execution keeps going for anyone
    /// else waiting on it. `work` is not started when the budget is already
    /// gone.
    pub async fn run<F>(&self, key: &str, budget: &TimeBudget, work: F) -> Result<Flight<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (future, shared) = {
            let mut entries = lock(&self.entries);
            match entries.get(key) {
                Some(entry) => {
                    debug!(
                        key,
                        age_ms = entry.created_at.elapsed().as_millis() as u64,
                        "Joining in-flight execution"
                    );
                    (entry.future.clone(), true)
                }
                None => {
                    if budget.expired() {
                        return Err(Error::BudgetExhausted(format!(
                            "no budget left to start '{}'",
                            key
                        )));
                    }
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let future = self.launch(key.to_string(), generation, work);
                    entries.insert(
                        key.to_string(),
                        Entry {
                            generation,
                            created_at: Instant::now(),
                            future: future.clone(),
                        },
                    );
                    (future, false)
                }
            }
        };

        debug!(key, shared, "Single-flight wait");
        let result = budget.run(future).await?;
        Ok(Flight { result, shared })
    }

    fn launch<F>(&self, key: String, generation: u64, work: F) -> FlightFuture<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let entries = Arc::clone(&self.entries);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = work.await;
            remove_if_current(&entries, &task_key, generation);
            Arc::new(result)
        });

        let entries = Arc::clone(&self.entries);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(key = %key, error = %e, "Single-flight task did not complete");
                    remove_if_current(&entries, &key, generation);
                    Arc::new(Err(Error::Internal(format!("single-flight task failed: {}", e))))
                }
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counted_work(
        counter: &Arc<AtomicUsize>,
        delay_ms: u64,
    ) -> impl Future<Output = Result<Vec<u32>>> + Send + 'static {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(vec![1, 2, 3])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_execution() {
        let flights: SingleFlight<Vec<u32>> = SingleFlight::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let budget = TimeBudget::from_millis(1_000);
        let key = flight_key("web", "rust async", 5);

        let calls = (0..8).map(|_| flights.run(&key, &budget, counted_work(&counter, 50)));
        let flights_out = futures::future::join_all(calls).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let first = flights_out[0].as_ref().unwrap();
        assert!(!first.shared);
        for other in &flights_out[1..] {
            let other = other.as_ref().unwrap();
            assert!(other.shared);
            assert!(Arc::ptr_eq(&first.result, &other.result));
        }
        assert!(!flights.contains(&key));
        assert_eq!(flights.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_removed_after_completion() {
        let flights: SingleFlight<Vec<u32>> = SingleFlight::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let budget = TimeBudget::from_millis(1_000);

        flights.run("k", &budget, counted_work(&counter, 5)).await.unwrap();
        flights.run("k", &budget, counted_work(&counter, 5)).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(!flights.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_shared_and_not_retained() {
        let flights: SingleFlight<Vec<u32>> = SingleFlight::new();
        let budget = TimeBudget::from_millis(1_000);

        let flight = flights
            .run("k", &budget, async {
                Err(Error::SourceError {
                    source_name: "web".to_string(),
                    message: "boom".to_string(),
                })
            })
            .await
            .unwrap();
        assert!(matches!(&*flight.result, Err(Error::SourceError { .. })));
        assert!(!flights.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_timeout_does_not_cancel_work() {
        let flights: SingleFlight<Vec<u32>> = SingleFlight::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let short = TimeBudget::from_millis(10);

        let done_in_task = Arc::clone(&done);
        let work = {
            let inner = counted_work(&counter, 100);
            async move {
                let out = inner.await;
                done_in_task.fetch_add(1, Ordering::SeqCst);
                out
            }
        };

        let result = flights.run("slow", &short, work).await;
        assert!(matches!(result, Err(Error::BudgetExhausted(_))));
        assert!(flights.contains("slow"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(!flights.contains("slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_joiner_with_own_budget() {
        let flights: SingleFlight<Vec<u32>> = SingleFlight::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let long = TimeBudget::from_millis(1_000);
        let short = TimeBudget::from_millis(20);

        let (owner, joiner) = tokio::join!(
            flights.run("k", &long, counted_work(&counter, 100)),
            flights.run("k", &short, counted_work(&counter, 100)),
        );
        assert!(owner.is_ok());
        assert!(matches!(joiner, Err(Error::BudgetExhausted(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_budget_does_not_start_work() {
        let flights: SingleFlight<Vec<u32>> = SingleFlight::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let budget = TimeBudget::from_millis(1);
        tokio::time::advance(Duration::from_millis(5)).await;

        let result = flights.run("k", &budget, counted_work(&counter, 1)).await;
        assert!(matches!(result, Err(Error::BudgetExhausted(_))));
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!flights.contains("k"));
    }

    #[test]
    fn test_flight_key_normalizes_query() {
        assert_eq!(
            flight_key("web", "  Rust   ASYNC ", 5),
            flight_key("web", "rust async", 5)
        );
        assert_ne!(flight_key("web", "rust", 5), flight_key("web", "rust", 6));
        assert_ne!(flight_key("web", "rust", 5), flight_key("kg", "rust", 5));
        assert!(flight_key("vector", "q", 1).starts_with("vector:"));
    }

    proptest! {
        #[test]
        fn normalize_query_is_idempotent(query in "[ a-zA-Z0-9]{0,40}") {
            let once = normalize_query(&query);
            prop_assert_eq!(normalize_query(&once), once.clone());
            prop_assert!(!once.starts_with(' ') && !once.ends_with(' '));
        }
    }
}
