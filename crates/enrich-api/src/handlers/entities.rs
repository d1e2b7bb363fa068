//! Read-only company and contact views plus dashboard counters.

use axum::{
    extract::rejection::PathRejection,
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use enrich_core::{CompanyRecord, ContactRecord, DashboardStats};

use crate::{ApiError, AppState};

pub async fn dashboard_stats(
    State(state): State<AppState>,
) -> Result<Json<DashboardStats>, ApiError> {
    Ok(Json(state.dispatcher.entities().dashboard_stats().await?))
}

pub async fn get_company(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<CompanyRecord>, ApiError> {
    let Path(id) = id?;
    state
        .dispatcher
        .entities()
        .get_company(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Company {id} not found")))
}

pub async fn list_company_contacts(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<ContactRecord>>, ApiError> {
    let Path(id) = id?;
    let entities = state.dispatcher.entities();
    if entities.get_company(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Company {id} not found")));
    }
    Ok(Json(entities.list_contacts_for_company(id).await?))
}

pub async fn get_contact(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ContactRecord>, ApiError> {
    let Path(id) = id?;
    state
        .dispatcher
        .entities()
        .get_contact(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Contact {id} not found")))
}
