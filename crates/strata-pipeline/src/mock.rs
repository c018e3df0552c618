//! In-memory source clients for tests and replay.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strata_core::{Candidate, Error, Result, SourceClient};

/// Returns a fixed list after an optional delay.
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    candidates: Vec<Candidate>,
    delay: Duration,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, candidates: Vec<Candidate>) -> Self {
        Self {
            name: name.into(),
            candidates,
            delay: Duration::ZERO,
        }
    }

    /// Answer only after `delay`, regardless of the caller's timeout.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SourceClient for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &str, k: usize, _timeout: Duration) -> Result<Vec<Candidate>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.candidates.iter().take(k).cloned().collect())
    }
}

/// Always fails with a backend error.
#[derive(Debug, Clone)]
pub struct FailingSource {
    name: String,
    message: String,
}

impl FailingSource {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl SourceClient for FailingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &str, _k: usize, _timeout: Duration) -> Result<Vec<Candidate>> {
        Err(Error::SourceError {
            source_name: self.name.clone(),
            message: self.message.clone(),
        })
    }
}

/// Counts calls reaching the wrapped client.
pub struct CountingSource {
    inner: Arc<dyn SourceClient>,
    calls: AtomicUsize,
}

impl CountingSource {
    pub fn new(inner: Arc<dyn SourceClient>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceClient for CountingSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn search(&self, query: &str, k: usize, timeout: Duration) -> Result<Vec<Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.search(query, k, timeout).await
    }
}
