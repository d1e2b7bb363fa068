//! In-memory store implementing every repository trait.
//!
//! Used by unit and API tests, and by embedders that want the queue without
//! PostgreSQL. A single mutex stands in for the row-level locking the
//! database provides, so `claim_next` stays atomic across tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use enrich_core::{
    stale_cutoff, ApiKey, ApiKeyRepository, ApplyReport, CompanyRecord, ContactRecord,
    DashboardStats, EnqueueRequest, EnrichmentJob, EnrichmentPayload, EntityLookup,
    EntityRepository, EntityType, Error, JobFilter, JobRepository, JobStatus, QueueStats, Result,
    RetryDecision, RetryPolicy, Service, UpsertApiKeyRequest,
};

use crate::jobs::{is_valid_transition, stale_claim_message};

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, EnrichmentJob>,
    api_keys: HashMap<Service, ApiKey>,
    companies: HashMap<Uuid, CompanyRecord>,
    contacts: HashMap<Uuid, ContactRecord>,
    /// Fixed clock for tests; `None` follows wall time.
    clock: Option<DateTime<Utc>>,
}

impl State {
    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn transition(job: &mut EnrichmentJob, to: JobStatus) -> Result<()> {
        if !is_valid_transition(job.status, to) {
            return Err(Error::Internal(format!(
                "invalid transition {} -> {} for job {}",
                job.status, to, job.id
            )));
        }
        job.status = to;
        Ok(())
    }

    fn apply_failure(
        job: &mut EnrichmentJob,
        decision: RetryDecision,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match decision {
            RetryDecision::Retry {
                retry_count,
                scheduled_for,
            } => {
                Self::transition(job, JobStatus::Pending)?;
                job.retry_count = retry_count;
                job.scheduled_for = scheduled_for;
            }
            RetryDecision::Exhausted { retry_count } => {
                Self::transition(job, JobStatus::Failed)?;
                job.retry_count = retry_count;
            }
        }
        job.last_error = Some(error.to_string());
        job.locked_at = None;
        job.locked_by = None;
        job.updated_at = now;
        Ok(())
    }

    fn claimed_mut(&mut self, job_id: Uuid, worker_id: &str) -> Result<&mut EnrichmentJob> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        if !job.is_locked_by(worker_id) {
            return Err(Error::ClaimLost(job_id));
        }
        Ok(job)
    }

    /// Eligible jobs in claim order.
    fn eligible(&self, now: DateTime<Utc>) -> Vec<&EnrichmentJob> {
        let mut jobs: Vec<&EnrichmentJob> =
            self.jobs.values().filter(|j| j.is_eligible(now)).collect();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_for.cmp(&b.scheduled_for))
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        jobs
    }
}

/// Shared in-memory store. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    policy: RetryPolicy,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            state: Arc::default(),
            policy,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("in-memory store lock poisoned".into()))
    }

    /// Pin the store clock; `None` returns to wall time.
    pub fn set_clock(&self, now: Option<DateTime<Utc>>) -> Result<()> {
        self.lock()?.clock = now;
        Ok(())
    }

    /// Move a pinned clock forward (pins it at wall time first if unset).
    pub fn advance(&self, by: Duration) -> Result<()> {
        let mut state = self.lock()?;
        let now = state.now();
        state.clock = Some(now + by);
        Ok(())
    }

    pub fn insert_company(&self, company: CompanyRecord) -> Result<Uuid> {
        let id = company.id;
        self.lock()?.companies.insert(id, company);
        Ok(id)
    }

    pub fn insert_contact(&self, contact: ContactRecord) -> Result<Uuid> {
        let mut state = self.lock()?;
        if let Some(email) = &contact.email {
            if state.contacts.values().any(|c| c.email.as_ref() == Some(email)) {
                return Err(Error::Validation(format!("duplicate contact email {email}")));
            }
        }
        let id = contact.id;
        state.contacts.insert(id, contact);
        Ok(id)
    }

    /// Insert a job row as-is, bypassing enqueue validation.
    pub fn insert_job(&self, job: EnrichmentJob) -> Result<()> {
        self.lock()?.jobs.insert(job.id, job);
        Ok(())
    }

    /// Every contact, ordered by email.
    pub fn contacts(&self) -> Result<Vec<ContactRecord>> {
        let mut contacts: Vec<ContactRecord> = self.lock()?.contacts.values().cloned().collect();
        contacts.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(contacts)
    }
}

#[async_trait]
impl JobRepository for InMemoryStore {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<Vec<EnrichmentJob>> {
        request.validate()?;
        let mut state = self.lock()?;
        let now = state.now();

        let jobs: Vec<EnrichmentJob> = request
            .services
            .iter()
            .map(|service| EnrichmentJob {
                id: Uuid::now_v7(),
                entity_type: request.entity_type,
                entity_id: request.entity_id,
                service: *service,
                priority: request.priority,
                status: JobStatus::Pending,
                retry_count: 0,
                max_retries: request.max_retries,
                last_error: None,
                scheduled_for: now,
                locked_at: None,
                locked_by: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        for job in &jobs {
            state.jobs.insert(job.id, job.clone());
        }
        Ok(jobs)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<EnrichmentJob>> {
        let mut state = self.lock()?;
        let now = state.now();

        let Some(id) = state.eligible(now).first().map(|j| j.id) else {
            return Ok(None);
        };
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::Internal(format!("job {id} vanished during claim")))?;
        State::transition(job, JobStatus::Processing)?;
        job.locked_at = Some(now);
        job.locked_by = Some(worker_id.to_string());
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_completed(&self, job_id: Uuid, worker_id: &str) -> Result<EnrichmentJob> {
        let mut state = self.lock()?;
        let now = state.now();
        let job = state.claimed_mut(job_id, worker_id)?;
        State::transition(job, JobStatus::Completed)?;
        job.locked_at = None;
        job.locked_by = None;
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
    ) -> Result<EnrichmentJob> {
        let mut state = self.lock()?;
        let now = state.now();
        let job = state.claimed_mut(job_id, worker_id)?;
        let decision = self.policy.on_failure(job.retry_count, job.max_retries, now);
        State::apply_failure(job, decision, error, now)?;
        Ok(job.clone())
    }

    async fn mark_fatal(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
    ) -> Result<EnrichmentJob> {
        let mut state = self.lock()?;
        let now = state.now();
        let job = state.claimed_mut(job_id, worker_id)?;
        State::transition(job, JobStatus::Failed)?;
        job.last_error = Some(error.to_string());
        job.locked_at = None;
        job.locked_by = None;
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn reclaim_stale(&self, stale_after: Duration) -> Result<Vec<EnrichmentJob>> {
        let mut state = self.lock()?;
        let now = state.now();
        let cutoff = stale_cutoff(now, stale_after)?;

        let mut stale: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|j| j.is_stale(cutoff))
            .map(|j| j.id)
            .collect();
        stale.sort();

        let mut reclaimed = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(job) = state.jobs.get_mut(&id) {
                let error = stale_claim_message(job);
                let decision = self.policy.on_failure(job.retry_count, job.max_retries, now);
                State::apply_failure(job, decision, &error, now)?;
                reclaimed.push(job.clone());
            }
        }
        Ok(reclaimed)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<EnrichmentJob>> {
        Ok(self.lock()?.jobs.get(&job_id).cloned())
    }

    async fn list_eligible(&self, limit: i64) -> Result<Vec<EnrichmentJob>> {
        let state = self.lock()?;
        let now = state.now();
        Ok(state
            .eligible(now)
            .into_iter()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_filtered(&self, filter: &JobFilter) -> Result<Vec<EnrichmentJob>> {
        let state = self.lock()?;
        let mut jobs: Vec<EnrichmentJob> = state
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let state = self.lock()?;
        let now = state.now();
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
            if job.is_eligible(now) {
                stats.eligible += 1;
            }
            stats.total += 1;
        }
        Ok(stats)
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryStore {
    async fn get_active(&self, service: Service) -> Result<Option<ApiKey>> {
        Ok(self
            .lock()?
            .api_keys
            .get(&service)
            .filter(|k| k.is_active)
            .cloned())
    }

    async fn active_services(&self) -> Result<Vec<Service>> {
        let mut services: Vec<Service> = self
            .lock()?
            .api_keys
            .values()
            .filter(|k| k.is_active)
            .map(|k| k.service)
            .collect();
        services.sort();
        Ok(services)
    }

    async fn list(&self) -> Result<Vec<ApiKey>> {
        let mut keys: Vec<ApiKey> = self.lock()?.api_keys.values().cloned().collect();
        keys.sort_by_key(|k| k.service);
        Ok(keys)
    }

    async fn upsert(&self, request: UpsertApiKeyRequest) -> Result<ApiKey> {
        request.validate()?;
        let mut state = self.lock()?;
        let now = state.now();
        let stored = request.secret.to_stored();

        let key = state
            .api_keys
            .entry(request.service)
            .and_modify(|k| {
                k.api_key = stored.clone();
                k.is_active = request.is_active;
                k.updated_at = now;
            })
            .or_insert_with(|| ApiKey {
                id: Uuid::now_v7(),
                service: request.service,
                api_key: stored.clone(),
                is_active: request.is_active,
                last_used_at: None,
                created_at: now,
                updated_at: now,
            });
        Ok(key.clone())
    }

    async fn set_active(&self, service: Service, active: bool) -> Result<ApiKey> {
        let mut state = self.lock()?;
        let now = state.now();
        let key = state
            .api_keys
            .get_mut(&service)
            .ok_or_else(|| Error::NotFound(format!("api key for {service}")))?;
        key.is_active = active;
        key.updated_at = now;
        Ok(key.clone())
    }

    async fn touch(&self, service: Service) -> Result<()> {
        let mut state = self.lock()?;
        let now = state.now();
        if let Some(key) = state.api_keys.get_mut(&service) {
            key.last_used_at = Some(now);
        }
        Ok(())
    }
}

#[async_trait]
impl EntityRepository for InMemoryStore {
    async fn exists(&self, entity_type: EntityType, entity_id: Uuid) -> Result<bool> {
        let state = self.lock()?;
        Ok(match entity_type {
            EntityType::Company => state.companies.contains_key(&entity_id),
            EntityType::Contact => state.contacts.contains_key(&entity_id),
        })
    }

    async fn lookup(&self, entity_type: EntityType, entity_id: Uuid) -> Result<EntityLookup> {
        let state = self.lock()?;
        let found = match entity_type {
            EntityType::Company => state.companies.get(&entity_id).map(EntityLookup::for_company),
            EntityType::Contact => state.contacts.get(&entity_id).map(EntityLookup::for_contact),
        };
        found.ok_or_else(|| Error::NotFound(format!("{entity_type} {entity_id}")))
    }

    async fn apply_enrichment(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        service: Service,
        payload: &EnrichmentPayload,
    ) -> Result<ApplyReport> {
        let mut state = self.lock()?;
        let at = state.now();

        // Stage every write on copies; nothing lands unless all of it does.
        let mut companies = state.companies.clone();
        let mut contacts = state.contacts.clone();

        match entity_type {
            EntityType::Company => {
                let company = companies
                    .get_mut(&entity_id)
                    .ok_or_else(|| Error::NotFound(format!("{entity_type} {entity_id}")))?;
                company.apply(&payload.company.clone().unwrap_or_default(), at);
            }
            EntityType::Contact => {
                let contact = contacts
                    .get_mut(&entity_id)
                    .ok_or_else(|| Error::NotFound(format!("{entity_type} {entity_id}")))?;
                contact.apply(&payload.contact.clone().unwrap_or_default(), at);
            }
        }

        let mut report = ApplyReport {
            entity_updated: true,
            ..Default::default()
        };
        for upsert in &payload.contacts {
            let existing = contacts
                .values_mut()
                .find(|c| c.email.as_deref() == Some(upsert.email.as_str()));
            match existing {
                Some(contact) => {
                    contact.apply_upsert(upsert, service, at);
                    report.contacts_updated += 1;
                }
                None => {
                    let mut contact = ContactRecord::new(upsert.email.clone());
                    contact.apply_upsert(upsert, service, at);
                    contacts.insert(contact.id, contact);
                    report.contacts_inserted += 1;
                }
            }
        }

        state.companies = companies;
        state.contacts = contacts;
        Ok(report)
    }

    async fn get_company(&self, id: Uuid) -> Result<Option<CompanyRecord>> {
        Ok(self.lock()?.companies.get(&id).cloned())
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<ContactRecord>> {
        Ok(self.lock()?.contacts.get(&id).cloned())
    }

    async fn list_contacts_for_company(&self, company_id: Uuid) -> Result<Vec<ContactRecord>> {
        let mut contacts: Vec<ContactRecord> = self
            .lock()?
            .contacts
            .values()
            .filter(|c| c.company_id == Some(company_id))
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(contacts)
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let state = self.lock()?;
        let last = state
            .companies
            .values()
            .filter_map(|c| c.last_enrichment_date)
            .chain(state.contacts.values().filter_map(|c| c.last_enrichment_date))
            .max();
        Ok(DashboardStats {
            companies: state.companies.len() as i64,
            contacts: state.contacts.len() as i64,
            last_enrichment_date: last,
        })
    }
}
