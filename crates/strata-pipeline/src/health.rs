//! Per-source latency and outcome tracking.
//!
//! Keeps a bounded window of recent calls per source and derives latency
//! percentiles, a failure rate, and an observed reliability. The risk-aware
//! allocator reads both; sources with no samples fall back to the plan's
//! static reliability.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use strata_core::defaults;

/// How a source call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Ok,
    Timeout,
    Error,
}

impl CallOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, CallOutcome::Ok)
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    latency_ms: u64,
    outcome: CallOutcome,
}

/// Statistics for one source over the retained window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthStats {
    /// Median latency (P50) in milliseconds.
    pub p50_ms: u64,
    /// 95th percentile latency in milliseconds.
    pub p95_ms: u64,
    /// Share of calls that timed out or errored.
    pub failure_rate: f64,
    pub samples: usize,
}

impl HealthStats {
    fn from_samples(samples: &VecDeque<Sample>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut latencies: Vec<u64> = samples.iter().map(|s| s.latency_ms).collect();
        latencies.sort_unstable();
        let n = latencies.len();
        let p95_idx = (n as f64 * 0.95) as usize;
        let failures = samples.iter().filter(|s| s.outcome.is_failure()).count();

        Self {
            p50_ms: latencies[(n / 2).min(n - 1)],
            p95_ms: latencies[p95_idx.min(n - 1)],
            failure_rate: failures as f64 / n as f64,
            samples: n,
        }
    }

    /// Success share in `[0,1]`.
    pub fn observed_reliability(&self) -> f64 {
        1.0 - self.failure_rate
    }
}

/// Shared health tracker for every retrieval source.
#[derive(Debug)]
pub struct SourceHealth {
    samples: RwLock<HashMap<String, VecDeque<Sample>>>,
    window: usize,
    total_calls: AtomicU64,
}

impl Default for SourceHealth {
    fn default() -> Self {
        Self::new(defaults::HEALTH_WINDOW)
    }
}

impl SourceHealth {
    /// Create a tracker retaining `window` samples per source.
    pub fn new(window: usize) -> Self {
        Self {
            samples: RwLock::new(HashMap::new()),
            window: window.max(1),
            total_calls: AtomicU64::new(0),
        }
    }

    /// Record one call.
    pub fn record(&self, source: &str, latency: Duration, outcome: CallOutcome) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let mut samples = self.samples.write().unwrap_or_else(|e| e.into_inner());
        let entry = samples.entry(source.to_string()).or_default();
        entry.push_back(Sample {
            latency_ms: latency.as_millis() as u64,
            outcome,
        });
        while entry.len() > self.window {
            entry.pop_front();
        }
    }

    pub fn stats(&self, source: &str) -> HealthStats {
        let samples = self.samples.read().unwrap_or_else(|e| e.into_inner());
        samples
            .get(source)
            .map(HealthStats::from_samples)
            .unwrap_or_default()
    }

    /// Failure rate of `source`, `0.0` with no samples.
    pub fn failure_rate(&self, source: &str) -> f64 {
        self.stats(source).failure_rate
    }

    /// Observed reliability of `source`, or `baseline` with no samples.
    pub fn reliability(&self, source: &str, baseline: f64) -> f64 {
        let stats = self.stats(source);
        if stats.samples == 0 {
            baseline
        } else {
            stats.observed_reliability()
        }
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_empty_source_uses_baseline() {
        let health = SourceHealth::default();
        assert_eq!(health.stats("web"), HealthStats::default());
        assert_eq!(health.failure_rate("web"), 0.0);
        assert_eq!(health.reliability("web", 0.8), 0.8);
    }

    #[test]
    fn test_percentiles_and_failure_rate() {
        let health = SourceHealth::new(100);
        for latency in 1..=10 {
            health.record("web", ms(latency * 10), CallOutcome::Ok);
        }
        health.record("web", ms(900), CallOutcome::Timeout);
        health.record("web", ms(5), CallOutcome::Error);

        let stats = health.stats("web");
        assert_eq!(stats.samples, 12);
        assert_eq!(stats.p50_ms, 60);
        assert_eq!(stats.p95_ms, 900);
        assert!((stats.failure_rate - 2.0 / 12.0).abs() < 1e-12);
        assert!((health.reliability("web", 0.1) - 10.0 / 12.0).abs() < 1e-12);
        assert_eq!(health.total_calls(), 12);
    }

    #[test]
    fn test_window_drops_oldest() {
        let health = SourceHealth::new(3);
        health.record("kg", ms(1), CallOutcome::Error);
        for _ in 0..3 {
            health.record("kg", ms(1), CallOutcome::Ok);
        }
        let stats = health.stats("kg");
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.failure_rate, 0.0);
    }

    #[test]
    fn test_sources_tracked_independently() {
        let health = SourceHealth::default();
        health.record("web", ms(10), CallOutcome::Ok);
        health.record("vector", ms(10), CallOutcome::Timeout);
        assert_eq!(health.failure_rate("web"), 0.0);
        assert_eq!(health.failure_rate("vector"), 1.0);
        assert_eq!(health.stats("vector").samples, 1);
    }
}
