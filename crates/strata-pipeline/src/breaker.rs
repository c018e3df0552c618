//! Per-source circuit breaker.
//!
//! ```text
//!   Closed ──(threshold consecutive failures)──> Open
//!   Open ──(cooldown elapsed)──> HalfOpen, one trial call admitted
//!   HalfOpen ──(success)──> Closed
//!   HalfOpen ──(failure)──> Open
//! ```
//!
//! Timeouts and backend errors both count as failures. A trial call that
//! never reports back does not wedge the circuit: another trial is admitted
//! once a further cooldown has passed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use strata_core::defaults;

use crate::health::CallOutcome;

/// Externally visible circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Whether a call to a source may go ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The circuit is half-open and this call is its trial.
    Trial,
    Rejected { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
enum Circuit {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { trial_since: Instant },
}

/// Circuit breakers for every retrieval source, keyed by source name.
#[derive(Debug)]
pub struct SourceBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl Default for SourceBreaker {
    fn default() -> Self {
        Self::new(
            defaults::BREAKER_FAILURE_THRESHOLD,
            Duration::from_millis(defaults::BREAKER_COOLDOWN_MS),
        )
    }
}

impl SourceBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether `source` may be called now.
    pub fn admit(&self, source: &str) -> Admission {
        let now = Instant::now();
        let mut circuits = self.lock();
        let Some(circuit) = circuits.get_mut(source) else {
            return Admission::Allowed;
        };

        match *circuit {
            Circuit::Closed { .. } => Admission::Allowed,
            Circuit::Open { until } if now < until => Admission::Rejected {
                retry_after: until.saturating_duration_since(now),
            },
            Circuit::HalfOpen { trial_since } if now < trial_since + self.cooldown => {
                Admission::Rejected {
                    retry_after: (trial_since + self.cooldown).saturating_duration_since(now),
                }
            }
            Circuit::Open { .. } | Circuit::HalfOpen { .. } => {
                *circuit = Circuit::HalfOpen { trial_since: now };
                info!(source, "Circuit half-open, admitting trial call");
                Admission::Trial
            }
        }
    }

    /// Feed the outcome of a completed call.
    pub fn record(&self, source: &str, outcome: CallOutcome) {
        let now = Instant::now();
        let mut circuits = self.lock();
        let circuit = circuits
            .entry(source.to_string())
            .or_insert(Circuit::Closed { failures: 0 });

        *circuit = match (*circuit, outcome.is_failure()) {
            (Circuit::HalfOpen { .. }, false) => {
                info!(source, "Trial call succeeded, circuit closed");
                Circuit::Closed { failures: 0 }
            }
            (_, false) => Circuit::Closed { failures: 0 },
            (Circuit::Closed { failures }, true) => {
                let failures = failures + 1;
                if failures >= self.failure_threshold {
                    warn!(
                        source,
                        failures,
                        cooldown_ms = self.cooldown.as_millis() as u64,
                        "Circuit opened"
                    );
                    Circuit::Open {
                        until: now + self.cooldown,
                    }
                } else {
                    Circuit::Closed { failures }
                }
            }
            (Circuit::HalfOpen { .. }, true) => {
                warn!(source, ?outcome, "Trial call failed, circuit re-opened");
                Circuit::Open {
                    until: now + self.cooldown,
                }
            }
            (open @ Circuit::Open { .. }, true) => open,
        };
    }

    pub fn state(&self, source: &str) -> BreakerState {
        match self.lock().get(source) {
            None | Some(Circuit::Closed { .. }) => BreakerState::Closed,
            Some(Circuit::Open { .. }) => BreakerState::Open,
            Some(Circuit::HalfOpen { .. }) => BreakerState::HalfOpen,
        }
    }
}
