//! Process-level pipeline configuration.
//!
//! Environment variables:
//! - `STRATA_DEFAULT_BUDGET_MS`: request budget when the caller sends none (default: 2500)
//! - `STRATA_RETRIEVAL_FRACTION`: share of the budget for retrieval, `(0,1]` (default: 0.6)
//! - `STRATA_RERANK_FRACTION`: share of what is left for reranking, `(0,1]` (default: 0.5)
//! - `STRATA_RERANK_PERMITS`: concurrent reranker admissions (default: 2)
//! - `STRATA_RERANK_WAIT_MS`: longest wait for a reranker permit (default: 150)
//! - `STRATA_MAX_QUERY_CHARS`: longest accepted query (default: 2048)
//! - `STRATA_DEFAULT_PROFILE`: plan used when a request names none (default: "default")
//! - `STRATA_BREAKER_FAILURES`: consecutive failures that open a source's circuit (default: 5)
//! - `STRATA_BREAKER_COOLDOWN_MS`: time an open circuit rejects calls (default: 30000)

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use strata_core::defaults;

/// Smallest stage fraction accepted from configuration.
const MIN_FRACTION: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub default_budget_ms: u64,
    pub retrieval_fraction: f64,
    pub rerank_fraction: f64,
    pub rerank_permits: usize,
    pub rerank_wait_ms: u64,
    pub max_query_chars: usize,
    pub default_profile: String,
    pub breaker_failures: u32,
    pub breaker_cooldown_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_budget_ms: defaults::BUDGET_MS,
            retrieval_fraction: defaults::RETRIEVAL_FRACTION,
            rerank_fraction: defaults::RERANK_FRACTION,
            rerank_permits: defaults::RERANK_PERMITS,
            rerank_wait_ms: defaults::RERANK_WAIT_MS,
            max_query_chars: defaults::MAX_QUERY_CHARS,
            default_profile: defaults::DEFAULT_PROFILE.to_string(),
            breaker_failures: defaults::BREAKER_FAILURE_THRESHOLD,
            breaker_cooldown_ms: defaults::BREAKER_COOLDOWN_MS,
        }
    }
}

impl PipelineConfig {
    /// Read `STRATA_*` variables over the defaults.
    ///
    /// Unparsable values are logged and ignored; parsed values are clamped.
    pub fn from_env() -> Self {
        let base = Self::default();
        let config = Self {
            default_budget_ms: parse_env("STRATA_DEFAULT_BUDGET_MS", base.default_budget_ms),
            retrieval_fraction: parse_env("STRATA_RETRIEVAL_FRACTION", base.retrieval_fraction),
            rerank_fraction: parse_env("STRATA_RERANK_FRACTION", base.rerank_fraction),
            rerank_permits: parse_env("STRATA_RERANK_PERMITS", base.rerank_permits),
            rerank_wait_ms: parse_env("STRATA_RERANK_WAIT_MS", base.rerank_wait_ms),
            max_query_chars: parse_env("STRATA_MAX_QUERY_CHARS", base.max_query_chars),
            default_profile: env::var("STRATA_DEFAULT_PROFILE")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(base.default_profile),
            breaker_failures: parse_env("STRATA_BREAKER_FAILURES", base.breaker_failures),
            breaker_cooldown_ms: parse_env("STRATA_BREAKER_COOLDOWN_MS", base.breaker_cooldown_ms),
        };
        config.clamped()
    }

    /// Bring every field into its accepted range.
    pub fn clamped(mut self) -> Self {
        self.retrieval_fraction = clamp_fraction("retrieval_fraction", self.retrieval_fraction);
        self.rerank_fraction = clamp_fraction("rerank_fraction", self.rerank_fraction);
        if self.rerank_permits == 0 {
            warn!("rerank_permits must be at least 1, using 1");
            self.rerank_permits = 1;
        }
        if self.default_budget_ms == 0 {
            warn!(
                default = defaults::BUDGET_MS,
                "default_budget_ms must be positive, using default"
            );
            self.default_budget_ms = defaults::BUDGET_MS;
        }
        if self.max_query_chars == 0 {
            self.max_query_chars = defaults::MAX_QUERY_CHARS;
        }
        if self.breaker_failures == 0 {
            warn!("breaker_failures must be at least 1, using 1");
            self.breaker_failures = 1;
        }
        self
    }

    pub fn rerank_wait(&self) -> Duration {
        Duration::from_millis(self.rerank_wait_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }
}

fn clamp_fraction(name: &str, value: f64) -> f64 {
    if !value.is_finite() {
        warn!(field = name, value, "Non-finite fraction, using 1.0");
        return 1.0;
    }
    let clamped = value.clamp(MIN_FRACTION, 1.0);
    if clamped != value {
        warn!(field = name, value, clamped, "Fraction out of range, clamping");
    }
    clamped
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, default = %default, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
