//! Trigger and queue-tick endpoints.
//!
//! `POST /api/enrich` enqueues jobs for one entity; `POST /api/queue/process`
//! runs a single claim and dispatch cycle.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use enrich_core::{EntityType, JobStatus, Service};
use enrich_jobs::{EnqueueOptions, TickResult};

use crate::{ApiError, AppState};

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

/// Body of `POST /api/enrich`.
///
/// Either `companyId`, or `entityType` together with `entityId`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichRequest {
    pub company_id: Option<Uuid>,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<Uuid>,
    /// Defaults to every service with an active key.
    pub services: Option<Vec<Service>>,
    pub priority: Option<i32>,
    pub max_retries: Option<i32>,
}

impl EnrichRequest {
    fn target(&self) -> Result<(EntityType, Uuid), ApiError> {
        if let Some(id) = self.company_id {
            return match (self.entity_type, self.entity_id) {
                (None | Some(EntityType::Company), None) => Ok((EntityType::Company, id)),
                _ => Err(ApiError::BadRequest(
                    "companyId cannot be combined with entityId".into(),
                )),
            };
        }
        match (self.entity_type, self.entity_id) {
            (Some(entity_type), Some(id)) => Ok((entity_type, id)),
            (None, None) => Err(ApiError::BadRequest("Company ID is required".into())),
            _ => Err(ApiError::BadRequest(
                "entityType and entityId must be given together".into(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EnrichResponse {
    pub success: bool,
}

/// Result of one queue tick.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessQueueResponse {
    pub success: bool,
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<i32>,
    /// Failure of the dispatched job, already sanitized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Enqueue enrichment jobs for one entity.
///
/// # Returns
/// - 200 OK once one job per service is queued
/// - 400 Bad Request on invalid input, an unknown entity, or when no service
///   has an active key
pub async fn trigger(
    State(state): State<AppState>,
    payload: Result<Json<EnrichRequest>, JsonRejection>,
) -> Result<Json<EnrichResponse>, ApiError> {
    let Json(request) = payload?;
    let (entity_type, entity_id) = request.target()?;

    state
        .dispatcher
        .enqueue_for_entity(
            entity_type,
            entity_id,
            EnqueueOptions {
                services: request.services,
                priority: request.priority,
                max_retries: request.max_retries,
            },
        )
        .await?;

    Ok(Json(EnrichResponse { success: true }))
}

/// Claim and dispatch at most one job.
pub async fn process_queue(
    State(state): State<AppState>,
) -> Result<Json<ProcessQueueResponse>, ApiError> {
    let response = match state.dispatcher.tick(&state.worker_id).await? {
        TickResult::Empty => ProcessQueueResponse {
            success: true,
            processed: false,
            message: Some("No pending jobs".into()),
            ..Default::default()
        },
        TickResult::Processed { job, outcome } => ProcessQueueResponse {
            success: true,
            processed: true,
            job_id: Some(job.id),
            service: Some(job.service),
            status: Some(job.status),
            retry_count: Some(job.retry_count),
            error: outcome.error().map(str::to_string),
            message: None,
        },
    };
    Ok(Json(response))
}
