//! # enrich-jobs
//!
//! Dispatch and background processing for the enrichment queue.
//!
//! This crate provides:
//! - The [`Dispatcher`], which routes a claimed job to its provider and
//!   records the outcome through the retry policy
//! - A polling [`JobWorker`] with bounded concurrency, periodic stale-claim
//!   recovery and an event broadcast
//!
//! ## Example
//!
//! ```ignore
//! use enrich_db::Database;
//! use enrich_jobs::{Dispatcher, JobWorker, WorkerConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//! let providers = enrich_providers::build_providers(&ProviderConfig::from_env())?;
//! let dispatcher = Dispatcher::from_database(&db).with_providers(providers);
//!
//! let handle = JobWorker::new(dispatcher, WorkerConfig::from_env()).start();
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//! handle.shutdown().await?;
//! ```

pub mod dispatcher;
pub mod worker;

// Re-export core types
pub use enrich_core::*;

pub use dispatcher::{Dispatcher, EnqueueOptions, Outcome, TickResult};
pub use worker::{JobWorker, WorkerConfig, WorkerEvent, WorkerHandle};

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = enrich_core::defaults::JOB_POLL_INTERVAL_MS;
