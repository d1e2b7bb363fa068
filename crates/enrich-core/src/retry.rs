//! Retry and backoff policy applied when a job attempt fails.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

/// Exponential backoff: `base × 2^retry_count`, capped at `max_delay`.
///
/// | Env Var | Default | Description |
/// |---------|---------|-------------|
/// | `JOB_BACKOFF_BASE_SECS` | 30 | Base delay, doubled for each recorded failure |
/// | `JOB_BACKOFF_MAX_SECS` | 3600 | Upper bound on any single delay |
/// | `JOB_MAX_RETRIES` | 3 | `max_retries` for jobs enqueued without one |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub default_max_retries: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(defaults::BACKOFF_BASE_SECS),
            max_delay: Duration::from_secs(defaults::BACKOFF_MAX_SECS),
            default_max_retries: defaults::JOB_MAX_RETRIES,
        }
    }
}

/// What the store should do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return to `pending`, claimable again at `scheduled_for`.
    Retry {
        retry_count: i32,
        scheduled_for: DateTime<Utc>,
    },
    /// Retries used up; the job becomes terminally `failed`.
    Exhausted { retry_count: i32 },
}

impl RetryDecision {
    pub fn retry_count(&self) -> i32 {
        match self {
            RetryDecision::Retry { retry_count, .. } | RetryDecision::Exhausted { retry_count } => {
                *retry_count
            }
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            ..Default::default()
        }
    }

    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let base = env_u64("JOB_BACKOFF_BASE_SECS").unwrap_or(defaults::BACKOFF_BASE_SECS);
        let max = env_u64("JOB_BACKOFF_MAX_SECS").unwrap_or(defaults::BACKOFF_MAX_SECS);
        let default_max_retries = std::env::var("JOB_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .filter(|v| *v >= 0)
            .unwrap_or(defaults::JOB_MAX_RETRIES);

        Self::new(Duration::from_secs(base), Duration::from_secs(max))
            .with_default_max_retries(default_max_retries)
    }

    pub fn with_default_max_retries(mut self, max_retries: i32) -> Self {
        self.default_max_retries = max_retries.max(0);
        self
    }

    /// Delay before the attempt following failure number `retry_count`.
    pub fn backoff(&self, retry_count: i32) -> Duration {
        let exp = retry_count.clamp(0, 31) as u32;
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide the outcome of a failed attempt on a job with `retry_count`
    /// failures so far.
    ///
    /// The new count is `retry_count + 1`, clamped to `max_retries`; reaching
    /// `max_retries` is terminal.
    pub fn on_failure(
        &self,
        retry_count: i32,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let max_retries = max_retries.max(0);
        let next = retry_count.saturating_add(1).min(max_retries);
        if retry_count.saturating_add(1) >= max_retries {
            return RetryDecision::Exhausted { retry_count: next };
        }
        let delay = chrono::Duration::from_std(self.backoff(next))
            .unwrap_or_else(|_| chrono::Duration::seconds(defaults::BACKOFF_MAX_SECS as i64));
        RetryDecision::Retry {
            retry_count: next,
            scheduled_for: now + delay,
        }
    }
}

/// Claims taken before the returned instant are stale.
///
/// Fails with `Validation` when `stale_after` is not positive or reaches
/// past the representable range.
pub fn stale_cutoff(now: DateTime<Utc>, stale_after: chrono::Duration) -> Result<DateTime<Utc>> {
    if stale_after <= chrono::Duration::zero() {
        return Err(Error::Validation("staleness window must be positive".into()));
    }
    now.checked_sub_signed(stale_after).ok_or_else(|| {
        Error::Validation(format!(
            "staleness window of {}s is out of range",
            stale_after.num_seconds()
        ))
    })
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok())
}
