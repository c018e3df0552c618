//! Hierarchical time budgets with cooperative cancellation.
//!
//! A [`TimeBudget`] is created once at request entry and passed explicitly to
//! every stage. Stages derive child budgets for their sub-work; a child's
//! deadline never exceeds its parent's. Nothing is killed forcibly: stages poll
//! [`TimeBudget::remaining`] / [`TimeBudget::expired`] at natural checkpoints and
//! return partial output once the budget is gone.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use strata_core::TimeBudget;
//!
//! let budget = TimeBudget::new(Duration::from_millis(500));
//! let retrieval = budget.child(0.6).unwrap();
//! assert!(retrieval.remaining() <= budget.remaining());
//! assert!(budget.child(1.5).is_err());
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// Cancellation flag linked to the parent's flag.
#[derive(Debug, Default)]
struct CancelScope {
    cancelled: AtomicBool,
    parent: Option<Arc<CancelScope>>,
}

impl CancelScope {
    fn child_of(parent: &Arc<CancelScope>) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            parent: Some(Arc::clone(parent)),
        }
    }

    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

/// A deadline token, divisible into child budgets.
///
/// Cloning shares the cancellation scope: cancelling a clone cancels the
/// original and every child derived from either.
#[derive(Debug, Clone)]
pub struct TimeBudget {
    deadline: Instant,
    cancel: Arc<CancelScope>,
}

impl TimeBudget {
    /// Create a root budget expiring `total` from now.
    pub fn new(total: Duration) -> Self {
        Self {
            deadline: Instant::now() + total,
            cancel: Arc::new(CancelScope::default()),
        }
    }

    /// Create a root budget from a millisecond count.
    pub fn from_millis(total_ms: u64) -> Self {
        Self::new(Duration::from_millis(total_ms))
    }

    /// Absolute monotonic deadline.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline. Zero once expired or cancelled, never negative.
    pub fn remaining(&self) -> Duration {
        if self.cancel.is_cancelled() {
            return Duration::ZERO;
        }
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Remaining time in whole milliseconds.
    pub fn remaining_ms(&self) -> u64 {
        self.remaining().as_millis() as u64
    }

    /// Whether the budget has run out.
    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Whether this budget or one of its ancestors was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Expire this budget and all of its descendants immediately.
    pub fn cancel(&self) {
        self.cancel.cancelled.store(true, Ordering::Release);
    }

    /// Derive a child that may use `fraction` of the remaining time.
    ///
    /// The child's deadline is `min(parent_deadline, now + fraction * remaining)`.
    /// `fraction` must lie in `(0, 1]`.
    pub fn child(&self, fraction: f64) -> Result<TimeBudget> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(Error::InvalidBudgetFraction(fraction));
        }
        let slice = self.remaining().mul_f64(fraction);
        Ok(self.derive(slice))
    }

    /// Derive a child capped at `cap`, never outliving the parent.
    pub fn child_capped(&self, cap: Duration) -> TimeBudget {
        self.derive(self.remaining().min(cap))
    }

    fn derive(&self, slice: Duration) -> TimeBudget {
        let deadline = (Instant::now() + slice).min(self.deadline);
        TimeBudget {
            deadline,
            cancel: Arc::new(CancelScope::child_of(&self.cancel)),
        }
    }

    /// Await `fut` until the deadline.
    ///
    /// Returns [`Error::BudgetExhausted`] without polling when the budget is
    /// already gone, or when the deadline passes first.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        if self.expired() {
            return Err(Error::BudgetExhausted("budget expired before start".to_string()));
        }
        tokio::time::timeout_at(self.deadline, fut)
            .await
            .map_err(|_| Error::BudgetExhausted("deadline reached".to_string()))
    }
}
