//! Core traits for store backends and enrichment providers.
//!
//! These traits define the interfaces that storage implementations
//! (PostgreSQL, in-memory) and provider backends must implement.

use async_trait::async_trait;
use chrono::Duration;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Repository for the enrichment job queue.
///
/// Every state change is a single conditional update: `claim_next` is the
/// only way into `processing`, and the `mark_*` operations only apply while
/// the caller still holds the claim.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create one pending job per requested service.
    ///
    /// The request is validated first; nothing is written when it fails.
    async fn enqueue(&self, request: EnqueueRequest) -> Result<Vec<EnrichmentJob>>;

    /// Atomically claim the eligible pending job with the highest priority,
    /// oldest `scheduled_for`, then oldest `created_at`.
    ///
    /// Returns `None` when nothing is eligible. Concurrent callers never
    /// receive the same job.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<EnrichmentJob>>;

    /// Finish a claimed job.
    async fn mark_completed(&self, job_id: Uuid, worker_id: &str) -> Result<EnrichmentJob>;

    /// Record a failed attempt and reschedule or terminate per the retry
    /// policy.
    async fn mark_failed(&self, job_id: Uuid, worker_id: &str, error: &str)
        -> Result<EnrichmentJob>;

    /// Terminate a claimed job without consuming retries.
    async fn mark_fatal(&self, job_id: Uuid, worker_id: &str, error: &str)
        -> Result<EnrichmentJob>;

    /// Treat every claim older than `stale_after`, measured on the store's
    /// clock, as a failed attempt.
    async fn reclaim_stale(&self, stale_after: Duration) -> Result<Vec<EnrichmentJob>>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<EnrichmentJob>>;

    /// Eligible jobs in claim order.
    async fn list_eligible(&self, limit: i64) -> Result<Vec<EnrichmentJob>>;

    /// List jobs with filtering, newest first.
    async fn list_filtered(&self, filter: &JobFilter) -> Result<Vec<EnrichmentJob>>;

    /// Counts per status.
    async fn queue_stats(&self) -> Result<QueueStats>;
}

// =============================================================================
// API KEYS
// =============================================================================

/// Repository for provider credentials.
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Active key for `service`, if any.
    async fn get_active(&self, service: Service) -> Result<Option<ApiKey>>;

    /// Services that currently have an active key.
    async fn active_services(&self) -> Result<Vec<Service>>;

    /// All stored keys.
    async fn list(&self) -> Result<Vec<ApiKey>>;

    /// Insert or replace the key for a service.
    async fn upsert(&self, request: UpsertApiKeyRequest) -> Result<ApiKey>;

    /// Enable or disable a key without touching its secret.
    async fn set_active(&self, service: Service, active: bool) -> Result<ApiKey>;

    /// Record that the key was just used.
    async fn touch(&self, service: Service) -> Result<()>;
}

// =============================================================================
// ENTITIES
// =============================================================================

/// Access to the companies and contacts that jobs enrich.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Whether the referenced entity exists.
    async fn exists(&self, entity_type: EntityType, entity_id: Uuid) -> Result<bool>;

    /// Identifying fields of an entity.
    async fn lookup(&self, entity_type: EntityType, entity_id: Uuid) -> Result<EntityLookup>;

    /// Apply a normalized payload as a single unit.
    ///
    /// Contacts are upserted by email, so applying the same payload twice
    /// leaves the same end state.
    async fn apply_enrichment(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        service: Service,
        payload: &EnrichmentPayload,
    ) -> Result<ApplyReport>;

    async fn get_company(&self, id: Uuid) -> Result<Option<CompanyRecord>>;

    async fn get_contact(&self, id: Uuid) -> Result<Option<ContactRecord>>;

    async fn list_contacts_for_company(&self, company_id: Uuid) -> Result<Vec<ContactRecord>>;

    async fn dashboard_stats(&self) -> Result<DashboardStats>;
}

// =============================================================================
// PROVIDERS
// =============================================================================

/// External data provider that can enrich an entity.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Service this provider serves.
    fn service(&self) -> Service;

    /// Entity types this provider can enrich.
    fn supports(&self, entity_type: EntityType) -> bool;

    /// Call the provider API and return its raw response.
    async fn fetch(&self, key: &ApiKey, entity: &EntityLookup) -> Result<JsonValue>;

    /// Map a raw response onto store fields.
    fn normalize(&self, entity: &EntityLookup, raw: JsonValue) -> Result<EnrichmentPayload>;

    /// Fetch then normalize.
    async fn enrich(&self, key: &ApiKey, entity: &EntityLookup) -> Result<EnrichmentPayload> {
        let raw = self.fetch(key, entity).await?;
        Ok(self.normalize(entity, raw)?.dedup_contacts())
    }
}
