//! Error types for the strata retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using strata's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for strata operations.
///
/// Most of these never reach the caller of the pipeline: per-source and
/// per-stage failures are folded into [`crate::PartialFailure`] records.
/// Only [`Error::InvalidQuery`] and [`Error::EvidenceStarvation`] are
/// request-level failures.
#[derive(Error, Debug)]
pub enum Error {
    /// A retrieval source did not answer within its child budget
    #[error("Source timeout: {source_name} after {elapsed_ms}ms")]
    SourceTimeout { source_name: String, elapsed_ms: u64 },

    /// A retrieval backend reported a failure
    #[error("Source error: {source_name}: {message}")]
    SourceError {
        source_name: String,
        message: String,
    },

    /// A source's circuit is open; the call was not made
    #[error("Source unavailable: {source_name} circuit open, retry in {retry_after_ms}ms")]
    SourceUnavailable {
        source_name: String,
        retry_after_ms: u64,
    },

    /// The time budget expired before the stage could finish
    #[error("Budget exhausted: {0}")]
    BudgetExhausted(String),

    /// The reranker concurrency gate refused admission
    #[error("Gate denied: {0}")]
    GateDenied(String),

    /// A retrieval plan or profile is malformed
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// A child budget was requested with a fraction outside (0, 1]
    #[error("Invalid budget fraction: {0}")]
    InvalidBudgetFraction(f64),

    /// The query failed validation before the pipeline started
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Every source failed and no fallback evidence exists
    #[error("Evidence starvation: all {0} sources failed")]
    EvidenceStarvation(usize),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable kind for diagnostics.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SourceTimeout { .. } => ErrorKind::SourceTimeout,
            Error::SourceError { .. } => ErrorKind::SourceError,
            Error::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            Error::BudgetExhausted(_) => ErrorKind::BudgetExhausted,
            Error::GateDenied(_) => ErrorKind::GateDenied,
            Error::InvalidPlan(_) => ErrorKind::InvalidPlan,
            Error::InvalidBudgetFraction(_) => ErrorKind::InvalidBudgetFraction,
            Error::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Error::EvidenceStarvation(_) => ErrorKind::EvidenceStarvation,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Config(_) => ErrorKind::Config,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether repeating the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SourceTimeout { .. } | Error::SourceError { .. } | Error::SourceUnavailable { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Error classification carried in diagnostics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceTimeout,
    SourceError,
    SourceUnavailable,
    BudgetExhausted,
    GateDenied,
    InvalidPlan,
    InvalidBudgetFraction,
    InvalidQuery,
    EvidenceStarvation,
    Serialization,
    Config,
    Internal,
}

impl ErrorKind {
    /// The snake_case name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceTimeout => "source_timeout",
            ErrorKind::SourceError => "source_error",
            ErrorKind::SourceUnavailable => "source_unavailable",
            ErrorKind::BudgetExhausted => "budget_exhausted",
            ErrorKind::GateDenied => "gate_denied",
            ErrorKind::InvalidPlan => "invalid_plan",
            ErrorKind::InvalidBudgetFraction => "invalid_budget_fraction",
            ErrorKind::InvalidQuery => "invalid_query",
            ErrorKind::EvidenceStarvation => "evidence_starvation",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_source_timeout() {
        let err = Error::SourceTimeout {
            source_name: "web".to_string(),
            elapsed_ms: 800,
        };
        assert_eq!(err.to_string(), "Source timeout: web after 800ms");
    }

    #[test]
    fn test_error_display_source_error() {
        let err = Error::SourceError {
            source_name: "vector".to_string(),
            message: "index offline".to_string(),
        };
        assert_eq!(err.to_string(), "Source error: vector: index offline");
    }

    #[test]
    fn test_error_display_source_unavailable() {
        let err = Error::SourceUnavailable {
            source_name: "kg".to_string(),
            retry_after_ms: 1200,
        };
        assert_eq!(
            err.to_string(),
            "Source unavailable: kg circuit open, retry in 1200ms"
        );
        assert_eq!(err.kind().as_str(), "source_unavailable");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_display_budget_fraction() {
        let err = Error::InvalidBudgetFraction(1.5);
        assert_eq!(err.to_string(), "Invalid budget fraction: 1.5");
    }

    #[test]
    fn test_error_display_evidence_starvation() {
        let err = Error::EvidenceStarvation(3);
        assert_eq!(err.to_string(), "Evidence starvation: all 3 sources failed");
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            Error::BudgetExhausted("fusion".into()).kind(),
            ErrorKind::BudgetExhausted
        );
        assert_eq!(Error::GateDenied("busy".into()).kind(), ErrorKind::GateDenied);
        assert_eq!(
            Error::InvalidPlan("bad".into()).kind().as_str(),
            "invalid_plan"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::SourceTimeout {
            source_name: "kg".into(),
            elapsed_ms: 10
        }
        .is_retryable());
        assert!(!Error::BudgetExhausted("x".into()).is_retryable());
        assert!(!Error::InvalidQuery("empty".into()).is_retryable());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::BudgetExhausted).unwrap();
        assert_eq!(json, "\"budget_exhausted\"");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_from_serde_yaml_error() {
        let yaml_err = serde_yaml::from_str::<Vec<i32>>("{not: [a list").unwrap_err();
        let err: Error = yaml_err.into();
        assert!(err.to_string().contains("Serialization error:"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
