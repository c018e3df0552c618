//! # strata-core
//!
//! Core types, traits, and budgets for the strata retrieval pipeline.
//!
//! This crate provides the data model shared by every stage, the deadline
//! token passed through a request, retrieval plans, and the collaborator
//! traits the pipeline is written against.

pub mod budget;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod plan;
pub mod traits;

// Re-export commonly used types at crate root
pub use budget::TimeBudget;
pub use error::{Error, ErrorKind, Result};
pub use models::*;
pub use plan::*;
pub use traits::*;
