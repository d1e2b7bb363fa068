//! Provider credential management.
//!
//! Secrets never leave the server; responses carry a masked value.

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    extract::{Path, State},
    Json,
};
use tracing::info;

use enrich_core::{ApiKeySummary, Service, UpsertApiKeyRequest};

use crate::{ApiError, AppState};

pub async fn list_api_keys(
    State(state): State<AppState>,
) -> Result<Json<Vec<ApiKeySummary>>, ApiError> {
    let keys = state.dispatcher.api_keys().list().await?;
    Ok(Json(keys.iter().map(|k| k.summary()).collect()))
}

/// Insert or replace the key for one service.
pub async fn upsert_api_key(
    State(state): State<AppState>,
    payload: Result<Json<UpsertApiKeyRequest>, JsonRejection>,
) -> Result<Json<ApiKeySummary>, ApiError> {
    let Json(request) = payload?;
    let key = state.dispatcher.api_keys().upsert(request).await?;
    info!(service = %key.service, is_active = key.is_active, "API key saved");
    Ok(Json(key.summary()))
}

pub async fn activate_api_key(
    State(state): State<AppState>,
    service: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiKeySummary>, ApiError> {
    set_active(state, service, true).await
}

pub async fn deactivate_api_key(
    State(state): State<AppState>,
    service: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiKeySummary>, ApiError> {
    set_active(state, service, false).await
}

async fn set_active(
    state: AppState,
    service: Result<Path<String>, PathRejection>,
    active: bool,
) -> Result<Json<ApiKeySummary>, ApiError> {
    let Path(service) = service?;
    let service: Service = service.parse()?;
    let key = state
        .dispatcher
        .api_keys()
        .set_active(service, active)
        .await?;
    info!(%service, is_active = active, "API key status changed");
    Ok(Json(key.summary()))
}
