//! Structured logging field name constants for strata.
//!
//! All crates use these constants for structured `tracing` fields so log
//! aggregation can query the same names across every stage.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Request-level failure returned to the caller |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Request completion, startup |
//! | DEBUG | Decision points, allocations, gate outcomes |
//! | TRACE | Per-candidate data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID for one pipeline run. Format: UUIDv7.
pub const REQUEST_ID: &str = "request_id";

/// Pipeline stage originating the event.
/// Values: "allocate", "retrieve", "calibrate", "fuse", "rerank", "diversify", "gate"
pub const STAGE: &str = "stage";

/// Retrieval source name.
pub const SOURCE: &str = "source";

/// Plan profile name.
pub const PROFILE: &str = "profile";

/// Query text.
pub const QUERY: &str = "query";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Remaining budget in milliseconds at the time of the event.
pub const BUDGET_REMAINING_MS: &str = "budget_remaining_ms";

/// Number of candidates produced by a stage.
pub const RESULT_COUNT: &str = "result_count";

/// K requested from a source.
pub const REQUESTED_K: &str = "k";

// ─── Fusion fields ─────────────────────────────────────────────────────────

/// Fusion method used ("rrf", "power_mean", "blend").
pub const FUSION_METHOD: &str = "fusion_method";

/// RRF k parameter.
pub const RRF_K: &str = "rrf_k";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error kind of a failure.
pub const ERROR_KIND: &str = "error_kind";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Whether a single-flight caller joined an existing execution.
pub const SHARED: &str = "shared";
