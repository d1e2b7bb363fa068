//! Dispatcher: runs one claimed job through its provider and records the result.
//!
//! Provider and store failures are classified here. Transient ones go back to
//! the queue through `mark_failed` and the retry policy; fatal ones terminate
//! the job through `mark_fatal` without consuming retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use enrich_core::{
    defaults, ApiKeyRepository, ApplyReport, EnqueueRequest, EnrichmentJob, EnrichmentProvider,
    EntityRepository, EntityType, Error, JobRepository, Result, Service,
};
use enrich_db::Database;

/// How a dispatch attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Payload applied to the entity.
    Success(ApplyReport),
    /// Transient failure; the job goes back to the queue if retries remain.
    RetryableFailure(String),
    /// Failure that cannot succeed on a later attempt.
    FatalFailure(String),
}

impl Outcome {
    /// Stored text carries the error kind and its public message; details
    /// stay in the logs.
    fn from_error(err: &Error) -> Self {
        let message = format!("{}: {}", err.kind(), err.public_message());
        if err.is_retryable() {
            Outcome::RetryableFailure(message)
        } else {
            Outcome::FatalFailure(message)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Stored error text, if the attempt failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::RetryableFailure(e) | Outcome::FatalFailure(e) => Some(e),
        }
    }
}

/// Result of one claim + dispatch cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TickResult {
    /// No eligible job.
    Empty,
    /// A job was claimed and dispatched; `job` is its state afterwards.
    Processed { job: EnrichmentJob, outcome: Outcome },
}

/// Optional overrides for [`Dispatcher::enqueue_for_entity`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Services to enqueue; `None` means every service with an active key.
    pub services: Option<Vec<Service>>,
    pub priority: Option<i32>,
    pub max_retries: Option<i32>,
}

/// Routes claimed jobs to providers and records outcomes in the job store.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct Dispatcher {
    jobs: Arc<dyn JobRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
    entities: Arc<dyn EntityRepository>,
    providers: Arc<HashMap<Service, Arc<dyn EnrichmentProvider>>>,
    timeout: Duration,
    default_max_retries: i32,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        api_keys: Arc<dyn ApiKeyRepository>,
        entities: Arc<dyn EntityRepository>,
    ) -> Self {
        Self {
            jobs,
            api_keys,
            entities,
            providers: Arc::new(HashMap::new()),
            timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
            default_max_retries: defaults::JOB_MAX_RETRIES,
        }
    }

    /// Dispatcher over the PostgreSQL repositories.
    pub fn from_database(db: &Database) -> Self {
        Self::new(
            Arc::new(db.jobs.clone()),
            Arc::new(db.api_keys.clone()),
            Arc::new(db.entities.clone()),
        )
    }

    /// Dispatcher over one store implementing every repository trait.
    pub fn from_store<S>(store: S) -> Self
    where
        S: JobRepository + ApiKeyRepository + EntityRepository + Clone + 'static,
    {
        Self::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
        )
    }

    /// Register a provider, replacing any previous one for its service.
    pub fn with_provider(mut self, provider: Arc<dyn EnrichmentProvider>) -> Self {
        Arc::make_mut(&mut self.providers).insert(provider.service(), provider);
        self
    }

    pub fn with_providers(
        self,
        providers: impl IntoIterator<Item = Arc<dyn EnrichmentProvider>>,
    ) -> Self {
        providers
            .into_iter()
            .fold(self, |dispatcher, provider| dispatcher.with_provider(provider))
    }

    /// Bound on one dispatch, provider call and apply included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `max_retries` for jobs enqueued without an explicit value.
    pub fn with_default_max_retries(mut self, max_retries: i32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn jobs(&self) -> &Arc<dyn JobRepository> {
        &self.jobs
    }

    pub fn api_keys(&self) -> &Arc<dyn ApiKeyRepository> {
        &self.api_keys
    }

    pub fn entities(&self) -> &Arc<dyn EntityRepository> {
        &self.entities
    }

    /// Services with a registered provider, in stable order.
    pub fn services(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self.providers.keys().copied().collect();
        services.sort();
        services
    }

    /// Enqueue one job per service for an existing entity.
    ///
    /// An unknown entity is a `Validation` error, like any other bad input.
    ///
    /// Without explicit services every service holding an active key is
    /// used; an explicit service without one is rejected.
    pub async fn enqueue_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        options: EnqueueOptions,
    ) -> Result<Vec<EnrichmentJob>> {
        if !self.entities.exists(entity_type, entity_id).await? {
            return Err(Error::Validation(format!(
                "{entity_type} {entity_id} does not exist"
            )));
        }

        let active = self.api_keys.active_services().await?;
        let services = match options.services {
            Some(requested) => {
                if let Some(inactive) = requested.iter().find(|s| !active.contains(*s)) {
                    return Err(Error::Validation(format!(
                        "no active API key for {inactive}"
                    )));
                }
                requested
            }
            None => active,
        };
        if services.is_empty() {
            return Err(Error::Validation("no active API keys configured".into()));
        }

        let mut request = EnqueueRequest::new(entity_type, entity_id, services)
            .with_max_retries(options.max_retries.unwrap_or(self.default_max_retries));
        if let Some(priority) = options.priority {
            request = request.with_priority(priority);
        }

        let jobs = self.jobs.enqueue(request).await?;
        info!(
            subsystem = "jobs",
            component = "dispatcher",
            op = "enqueue",
            %entity_type,
            %entity_id,
            count = jobs.len(),
            "Enqueued enrichment jobs"
        );
        Ok(jobs)
    }

    /// Claim the next eligible job and dispatch it.
    pub async fn tick(&self, worker_id: &str) -> Result<TickResult> {
        match self.jobs.claim_next(worker_id).await? {
            Some(job) => {
                let (job, outcome) = self.process(job, worker_id).await?;
                Ok(TickResult::Processed { job, outcome })
            }
            None => {
                debug!(subsystem = "jobs", worker_id, "No eligible jobs");
                Ok(TickResult::Empty)
            }
        }
    }

    /// Dispatch a job claimed by `worker_id` and record the outcome.
    ///
    /// Store errors while recording (including a lost claim) are returned;
    /// the job row is then left to stale-claim recovery.
    pub async fn process(
        &self,
        job: EnrichmentJob,
        worker_id: &str,
    ) -> Result<(EnrichmentJob, Outcome)> {
        let start = Instant::now();
        let outcome = self.dispatch(&job).await;

        let updated = match &outcome {
            Outcome::Success(_) => self.jobs.mark_completed(job.id, worker_id).await?,
            Outcome::RetryableFailure(error) => {
                self.jobs.mark_failed(job.id, worker_id, error).await?
            }
            Outcome::FatalFailure(error) => self.jobs.mark_fatal(job.id, worker_id, error).await?,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Outcome::Success(report) => info!(
                subsystem = "jobs",
                job_id = %job.id,
                service = %job.service,
                worker_id,
                contacts_inserted = report.contacts_inserted,
                contacts_updated = report.contacts_updated,
                duration_ms,
                "Job completed"
            ),
            Outcome::RetryableFailure(error) | Outcome::FatalFailure(error) => warn!(
                subsystem = "jobs",
                job_id = %job.id,
                service = %job.service,
                worker_id,
                status = %updated.status,
                retry_count = updated.retry_count,
                %error,
                duration_ms,
                "Job failed"
            ),
        }

        Ok((updated, outcome))
    }

    /// Run the provider for a job and apply its payload.
    ///
    /// Never touches the job row; see [`Dispatcher::process`].
    #[instrument(skip(self, job), fields(job_id = %job.id, service = %job.service))]
    pub async fn dispatch(&self, job: &EnrichmentJob) -> Outcome {
        match tokio::time::timeout(self.timeout, self.run(job)).await {
            Ok(Ok(report)) => Outcome::Success(report),
            Ok(Err(err)) => {
                warn!(kind = err.kind(), error = %err, "Dispatch failed");
                Outcome::from_error(&err)
            }
            Err(_) => Outcome::RetryableFailure(format!(
                "ProviderError: dispatch exceeded timeout of {}s",
                self.timeout.as_secs()
            )),
        }
    }

    async fn run(&self, job: &EnrichmentJob) -> Result<ApplyReport> {
        let provider = self
            .providers
            .get(&job.service)
            .ok_or_else(|| Error::Config(format!("no provider registered for {}", job.service)))?;
        if !provider.supports(job.entity_type) {
            return Err(Error::Validation(format!(
                "{} does not enrich {} records",
                job.service, job.entity_type
            )));
        }

        let key = self
            .api_keys
            .get_active(job.service)
            .await?
            .ok_or(Error::MissingCredentials(job.service))?;
        let entity = self.entities.lookup(job.entity_type, job.entity_id).await?;

        if let Err(e) = self.api_keys.touch(job.service).await {
            warn!(service = %job.service, error = %e, "Failed to record API key usage");
        }

        let payload = provider.enrich(&key, &entity).await?;
        self.entities
            .apply_enrichment(job.entity_type, job.entity_id, job.service, &payload)
            .await
    }

    /// Return abandoned `processing` claims to the queue.
    ///
    /// A claim is abandoned once its `locked_at` is older than `stale_after`.
    /// The window must exceed the dispatch timeout and stay within
    /// `JOB_STALE_AFTER_MAX_SECS`.
    pub async fn reclaim_stale(&self, stale_after: Duration) -> Result<Vec<EnrichmentJob>> {
        if stale_after <= self.timeout {
            return Err(Error::Validation(format!(
                "staleness window of {}s must exceed the dispatch timeout of {}s",
                stale_after.as_secs(),
                self.timeout.as_secs()
            )));
        }
        if stale_after > Duration::from_secs(defaults::JOB_STALE_AFTER_MAX_SECS) {
            return Err(Error::Validation(format!(
                "staleness window of {}s exceeds the maximum of {}s",
                stale_after.as_secs(),
                defaults::JOB_STALE_AFTER_MAX_SECS
            )));
        }
        let window = chrono::Duration::from_std(stale_after)
            .map_err(|e| Error::Validation(format!("invalid staleness window: {e}")))?;
        let reclaimed = self.jobs.reclaim_stale(window).await?;

        for job in &reclaimed {
            warn!(
                subsystem = "jobs",
                op = "reclaim",
                job_id = %job.id,
                service = %job.service,
                status = %job.status,
                retry_count = job.retry_count,
                "Reclaimed stale claim"
            );
        }
        Ok(reclaimed)
    }
}
