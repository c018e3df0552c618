//! # strata-pipeline
//!
//! Budgeted retrieval orchestration and the end-to-end ranking pipeline.
//!
//! This crate provides:
//! - In-flight deduplication of identical source lookups
//! - Per-source latency and failure tracking, with a circuit breaker per source
//! - Concurrent fan-out to retrieval sources under a time budget
//! - The [`Pipeline`] tying allocation, calibration, fusion, reranking,
//!   diversity, and the quality gate together
//! - Environment configuration and tracing setup
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use strata_pipeline::mock::StaticSource;
//! use strata_pipeline::{Candidate, Pipeline, PipelineConfig, PipelineRequest, PlanRegistry};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let web = StaticSource::new(
//!     "web",
//!     vec![Candidate::new("doc-1", "web", 1, 0.9).with_snippet("tokio runtime internals")],
//! );
//! let pipeline = Pipeline::new(PipelineConfig::default(), PlanRegistry::default())
//!     .with_source(Arc::new(web));
//!
//! let output = pipeline.run(&PipelineRequest::new("tokio runtime")).await.unwrap();
//! assert_eq!(output.candidates[0].id(), "doc-1");
//! # }
//! ```

pub mod breaker;
pub mod config;
pub mod health;
pub mod mock;
pub mod orchestrator;
pub mod pipeline;
pub mod single_flight;
pub mod telemetry;

// Re-export ranking and core types
pub use strata_search::*;

// Re-export pipeline types
pub use breaker::{Admission, BreakerState, SourceBreaker};
pub use config::PipelineConfig;
pub use health::{CallOutcome, HealthStats, SourceHealth};
pub use orchestrator::{Retrieval, Retriever, SourceBatch};
pub use pipeline::{validate_query, Pipeline, PipelineOutput, PipelineRequest};
pub use single_flight::{flight_key, Flight, SingleFlight};
pub use telemetry::init_tracing;
