//! Centralized default constants for the enrichment system.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Environment overrides are read by each component's `from_env()`.

// =============================================================================
// QUEUE
// =============================================================================

/// Priority given to jobs enqueued without an explicit priority.
pub const JOB_PRIORITY: i32 = 1;

/// Maximum failed attempts before a job becomes terminally `failed`.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Default page size for job listings.
pub const PAGE_LIMIT: i64 = 50;

/// Upper bound for any single job listing request.
pub const PAGE_LIMIT_MAX: i64 = 500;

// =============================================================================
// RETRY / BACKOFF
// =============================================================================

/// Base delay of the exponential backoff (`base × 2^retry_count`).
pub const BACKOFF_BASE_SECS: u64 = 30;

/// Cap applied to the backoff delay.
pub const BACKOFF_MAX_SECS: u64 = 3600;

// =============================================================================
// WORKER
// =============================================================================

/// Polling interval when the queue is empty (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 5_000;

/// Maximum jobs processed concurrently by one worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// A `processing` claim older than this is considered abandoned.
pub const JOB_STALE_AFTER_SECS: u64 = 600;

/// Longest staleness window accepted from config or a reclaim request (7 days).
pub const JOB_STALE_AFTER_MAX_SECS: u64 = 7 * 24 * 60 * 60;

/// Upper bound on one dispatch (provider call plus apply).
///
/// Must stay below [`JOB_STALE_AFTER_SECS`] so a live worker never holds a
/// claim long enough to be reclaimed.
pub const JOB_TIMEOUT_SECS: u64 = 120;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// PROVIDERS
// =============================================================================

/// Apollo REST API root.
pub const APOLLO_URL: &str = "https://api.apollo.io/api/v1";

/// BuiltWith API root.
pub const BUILTWITH_URL: &str = "https://api.builtwith.com";

/// Scrapin API root.
pub const SCRAPIN_URL: &str = "https://api.scrapin.io";

/// Timeout for a single provider HTTP request (seconds).
pub const PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Maximum contacts requested from a people search.
pub const APOLLO_PEOPLE_PER_PAGE: u32 = 25;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default database URL when `DATABASE_URL` is unset.
pub const DATABASE_URL: &str = "postgres://localhost/enrich";
