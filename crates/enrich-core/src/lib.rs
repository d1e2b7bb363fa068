//! # enrich-core
//!
//! Core types, traits, and policies for the enrichment job queue.
//!
//! This crate provides the data structures, the retry policy, and the trait
//! definitions that the store, provider, job and API crates depend on.

pub mod defaults;
pub mod error;
pub mod models;
pub mod retry;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use retry::{stale_cutoff, RetryDecision, RetryPolicy};
pub use traits::*;
