//! enrich-api - HTTP API for the enrichment queue
//!
//! The router is built by [`app`] so tests can serve it over any store.

pub mod error;
pub mod handlers;

use std::time::Duration;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use enrich_core::defaults;
use enrich_jobs::Dispatcher;

pub use error::ApiError;

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    /// Lock holder recorded by the tick endpoint.
    pub worker_id: String,
    /// Staleness window used by the manual reclaim endpoint.
    pub stale_after: Duration,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            worker_id: format!("api-{}", Uuid::now_v7()),
            stale_after: Duration::from_secs(defaults::JOB_STALE_AFTER_SECS),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

// =============================================================================
// ROUTER
// =============================================================================

/// Build the full router with middleware.
pub fn app(state: AppState) -> Router {
    use handlers::{api_keys, enrich, entities, jobs};

    Router::new()
        .route("/health", get(health))
        // Trigger and tick
        .route("/api/enrich", post(enrich::trigger))
        .route("/api/queue/process", post(enrich::process_queue))
        // Queue introspection
        .route("/api/v1/jobs", get(jobs::list_jobs))
        .route("/api/v1/jobs/stats", get(jobs::queue_stats))
        .route("/api/v1/jobs/eligible", get(jobs::list_eligible))
        .route("/api/v1/jobs/reclaim", post(jobs::reclaim_stale))
        .route("/api/v1/jobs/:id", get(jobs::get_job))
        // Provider credentials
        .route(
            "/api/v1/api-keys",
            get(api_keys::list_api_keys).put(api_keys::upsert_api_key),
        )
        .route(
            "/api/v1/api-keys/:service/activate",
            post(api_keys::activate_api_key),
        )
        .route(
            "/api/v1/api-keys/:service/deactivate",
            post(api_keys::deactivate_api_key),
        )
        // Entities and dashboard
        .route("/api/v1/stats", get(entities::dashboard_stats))
        .route("/api/v1/companies/:id", get(entities::get_company))
        .route(
            "/api/v1/companies/:id/contacts",
            get(entities::list_company_contacts),
        )
        .route("/api/v1/contacts/:id", get(entities::get_contact))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer()),
        )
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
