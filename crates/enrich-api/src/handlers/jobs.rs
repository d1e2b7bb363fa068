//! Queue introspection and manual stale-claim recovery.

use std::time::Duration;

use axum::{
    extract::rejection::{PathRejection, QueryRejection},
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use enrich_core::{defaults, EnrichmentJob, JobFilter, QueueStats};

use crate::{ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct EligibleQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReclaimQuery {
    /// Overrides the configured staleness window.
    pub stale_after_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ReclaimResponse {
    pub success: bool,
    pub reclaimed: usize,
    pub jobs: Vec<EnrichmentJob>,
}

/// List jobs, newest first, filtered by status, service or entity.
pub async fn list_jobs(
    State(state): State<AppState>,
    filter: Result<Query<JobFilter>, QueryRejection>,
) -> Result<Json<Vec<EnrichmentJob>>, ApiError> {
    let Query(filter) = filter?;
    let jobs = state.dispatcher.jobs().list_filtered(&filter).await?;
    Ok(Json(jobs))
}

pub async fn get_job(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<EnrichmentJob>, ApiError> {
    let Path(id) = id?;
    state
        .dispatcher
        .jobs()
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job {id} not found")))
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.dispatcher.jobs().queue_stats().await?))
}

/// Jobs a worker could claim right now, in claim order.
pub async fn list_eligible(
    State(state): State<AppState>,
    query: Result<Query<EligibleQuery>, QueryRejection>,
) -> Result<Json<Vec<EnrichmentJob>>, ApiError> {
    let Query(query) = query?;
    let limit = query
        .limit
        .unwrap_or(defaults::PAGE_LIMIT)
        .clamp(1, defaults::PAGE_LIMIT_MAX);
    Ok(Json(state.dispatcher.jobs().list_eligible(limit).await?))
}

/// Return abandoned `processing` claims to the queue.
///
/// # Returns
/// - 200 OK with the reclaimed jobs
/// - 400 Bad Request if `stale_after_secs` does not exceed the dispatch
///   timeout or is above `JOB_STALE_AFTER_MAX_SECS`
pub async fn reclaim_stale(
    State(state): State<AppState>,
    query: Result<Query<ReclaimQuery>, QueryRejection>,
) -> Result<Json<ReclaimResponse>, ApiError> {
    let Query(query) = query?;
    let stale_after = query
        .stale_after_secs
        .map(Duration::from_secs)
        .unwrap_or(state.stale_after);

    let jobs = state.dispatcher.reclaim_stale(stale_after).await?;
    Ok(Json(ReclaimResponse {
        success: true,
        reclaimed: jobs.len(),
        jobs,
    }))
}
