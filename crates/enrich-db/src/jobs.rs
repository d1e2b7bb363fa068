//! Job queue repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use enrich_core::{
    stale_cutoff, EnqueueRequest, EnrichmentJob, Error, JobFilter, JobRepository, JobStatus,
    QueueStats, Result, RetryDecision, RetryPolicy,
};

const JOB_COLUMNS: &str = "id, entity_type, entity_id, service, priority, status, retry_count, \
     max_retries, last_error, scheduled_for, locked_at, locked_by, created_at, updated_at";

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    policy: RetryPolicy,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self::with_policy(pool, RetryPolicy::default())
    }

    pub fn with_policy(pool: Pool<Postgres>, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub(crate) fn parse_job_row(row: &PgRow) -> Result<EnrichmentJob> {
        let entity_type: String = row.try_get("entity_type")?;
        let service: String = row.try_get("service")?;
        let status: String = row.try_get("status")?;
        Ok(EnrichmentJob {
            id: row.try_get("id")?,
            entity_type: entity_type.parse()?,
            entity_id: row.try_get("entity_id")?,
            service: service.parse()?,
            priority: row.try_get("priority")?,
            status: status.parse()?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            last_error: row.try_get("last_error")?,
            scheduled_for: row.try_get("scheduled_for")?,
            locked_at: row.try_get("locked_at")?,
            locked_by: row.try_get("locked_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Lock a job row and check that `worker_id` still holds its claim.
    async fn lock_claimed(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        job_id: Uuid,
        worker_id: &str,
    ) -> Result<EnrichmentJob> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM enrichment_queue WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;

        let job = Self::parse_job_row(&row)?;
        if !job.is_locked_by(worker_id) {
            return Err(Error::ClaimLost(job_id));
        }
        Ok(job)
    }

    /// Write a failure decision for a locked job.
    async fn apply_failure(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        job: &EnrichmentJob,
        decision: RetryDecision,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentJob> {
        let (status, retry_count, scheduled_for) = match decision {
            RetryDecision::Retry {
                retry_count,
                scheduled_for,
            } => (JobStatus::Pending, retry_count, Some(scheduled_for)),
            RetryDecision::Exhausted { retry_count } => (JobStatus::Failed, retry_count, None),
        };

        let row = sqlx::query(&format!(
            "UPDATE enrichment_queue
             SET status = $2, retry_count = $3, last_error = $4,
                 scheduled_for = COALESCE($5, scheduled_for),
                 locked_at = NULL, locked_by = NULL, updated_at = $6
             WHERE id = $1
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job.id)
        .bind(status.as_str())
        .bind(retry_count)
        .bind(error)
        .bind(scheduled_for)
        .bind(now)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Self::parse_job_row(&row)
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<Vec<EnrichmentJob>> {
        request.validate()?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut jobs = Vec::with_capacity(request.services.len());
        for service in &request.services {
            let row = sqlx::query(&format!(
                "INSERT INTO enrichment_queue
                     (id, entity_type, entity_id, service, priority, status, retry_count,
                      max_retries, scheduled_for, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $7, $7, $7)
                 RETURNING {JOB_COLUMNS}"
            ))
            .bind(Uuid::now_v7())
            .bind(request.entity_type.as_str())
            .bind(request.entity_id)
            .bind(service.as_str())
            .bind(request.priority)
            .bind(request.max_retries)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;
            jobs.push(Self::parse_job_row(&row)?);
        }
        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "queue",
            op = "enqueue",
            entity_type = %request.entity_type,
            entity_id = %request.entity_id,
            job_count = jobs.len(),
            priority = request.priority,
            "Enqueued enrichment jobs"
        );
        Ok(jobs)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<EnrichmentJob>> {
        let now = Utc::now();

        // One conditional write; SKIP LOCKED keeps concurrent claimers off the
        // row another transaction is already taking.
        let row = sqlx::query(&format!(
            "UPDATE enrichment_queue
             SET status = 'processing', locked_at = $1, locked_by = $2, updated_at = $1
             WHERE id = (
                 SELECT id FROM enrichment_queue
                 WHERE status = 'pending' AND scheduled_for <= $1
                 ORDER BY priority DESC, scheduled_for ASC, created_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let job = row.as_ref().map(Self::parse_job_row).transpose()?;
        if let Some(job) = &job {
            debug!(
                subsystem = "queue",
                op = "claim",
                job_id = %job.id,
                service = %job.service,
                worker_id,
                "Claimed job"
            );
        }
        Ok(job)
    }

    async fn mark_completed(&self, job_id: Uuid, worker_id: &str) -> Result<EnrichmentJob> {
        let row = sqlx::query(&format!(
            "UPDATE enrichment_queue
             SET status = 'completed', locked_at = NULL, locked_by = NULL, updated_at = $3
             WHERE id = $1 AND status = 'processing' AND locked_by = $2
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(worker_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(&row),
            None => Err(self.missing_claim(job_id).await),
        }
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
    ) -> Result<EnrichmentJob> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let job = Self::lock_claimed(&mut tx, job_id, worker_id).await?;
        let decision = self.policy.on_failure(job.retry_count, job.max_retries, now);
        let updated = Self::apply_failure(&mut tx, &job, decision, error, now).await?;

        tx.commit().await.map_err(Error::Database)?;

        warn!(
            subsystem = "queue",
            op = "fail",
            job_id = %job_id,
            retry_count = updated.retry_count,
            max_retries = updated.max_retries,
            status = %updated.status,
            "Job attempt failed"
        );
        Ok(updated)
    }

    async fn mark_fatal(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
    ) -> Result<EnrichmentJob> {
        let row = sqlx::query(&format!(
            "UPDATE enrichment_queue
             SET status = 'failed', last_error = $3, locked_at = NULL, locked_by = NULL,
                 updated_at = $4
             WHERE id = $1 AND status = 'processing' AND locked_by = $2
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(worker_id)
        .bind(error)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(&row),
            None => Err(self.missing_claim(job_id).await),
        }
    }

    async fn reclaim_stale(&self, stale_after: chrono::Duration) -> Result<Vec<EnrichmentJob>> {
        let now = Utc::now();
        let cutoff = stale_cutoff(now, stale_after)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM enrichment_queue
             WHERE status = 'processing' AND locked_at < $1
             ORDER BY locked_at ASC
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let mut reclaimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let job = Self::parse_job_row(row)?;
            let error = stale_claim_message(&job);
            let decision = self.policy.on_failure(job.retry_count, job.max_retries, now);
            reclaimed.push(Self::apply_failure(&mut tx, &job, decision, &error, now).await?);
        }

        tx.commit().await.map_err(Error::Database)?;

        if !reclaimed.is_empty() {
            warn!(
                subsystem = "queue",
                op = "reclaim_stale",
                count = reclaimed.len(),
                cutoff = %cutoff,
                "Reclaimed stale claims"
            );
        }
        Ok(reclaimed)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<EnrichmentJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM enrichment_queue WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn list_eligible(&self, limit: i64) -> Result<Vec<EnrichmentJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM enrichment_queue
             WHERE status = 'pending' AND scheduled_for <= $1
             ORDER BY priority DESC, scheduled_for ASC, created_at ASC, id ASC
             LIMIT $2"
        ))
        .bind(Utc::now())
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_job_row).collect()
    }

    async fn list_filtered(&self, filter: &JobFilter) -> Result<Vec<EnrichmentJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM enrichment_queue
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::text IS NULL OR service = $2)
               AND ($3::uuid IS NULL OR entity_id = $3)
             ORDER BY created_at DESC, id DESC
             LIMIT $4 OFFSET $5"
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.service.map(|s| s.as_str()))
        .bind(filter.entity_id)
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_job_row).collect()
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'pending' AND scheduled_for <= $1) AS eligible,
                COUNT(*) AS total
             FROM enrichment_queue",
        )
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            pending: row.try_get("pending")?,
            processing: row.try_get("processing")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
            eligible: row.try_get("eligible")?,
            total: row.try_get("total")?,
        })
    }
}

impl PgJobRepository {
    /// Error for a mark operation whose conditional update matched no row.
    async fn missing_claim(&self, job_id: Uuid) -> Error {
        match self.get(job_id).await {
            Ok(Some(_)) => Error::ClaimLost(job_id),
            Ok(None) => Error::NotFound(format!("job {job_id}")),
            Err(e) => e,
        }
    }
}

/// `last_error` recorded when a claim is reclaimed.
pub fn stale_claim_message(job: &EnrichmentJob) -> String {
    let holder = job.locked_by.as_deref().unwrap_or("unknown");
    let since = job
        .locked_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    format!("StaleClaim: claim held by {holder} since {since}")
}

/// Status transitions a job may take.
pub fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
    matches!(
        (from, to),
        (JobStatus::Pending, JobStatus::Processing)
            | (JobStatus::Processing, JobStatus::Completed)
            | (JobStatus::Processing, JobStatus::Pending)
            | (JobStatus::Processing, JobStatus::Failed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_core::{EntityType, Service};

    fn processing_job() -> EnrichmentJob {
        let now = Utc::now();
        EnrichmentJob {
            id: Uuid::now_v7(),
            entity_type: EntityType::Company,
            entity_id: Uuid::now_v7(),
            service: Service::Scrapin,
            priority: 1,
            status: JobStatus::Processing,
            retry_count: 0,
            max_retries: 3,
            last_error: None,
            scheduled_for: now,
            locked_at: Some(now),
            locked_by: Some("worker-a".into()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_stale_claim_message_names_holder() {
        let msg = stale_claim_message(&processing_job());
        assert!(msg.starts_with("StaleClaim: claim held by worker-a since "));
    }

    #[test]
    fn test_forward_transitions_only() {
        assert!(is_valid_transition(JobStatus::Pending, JobStatus::Processing));
        assert!(is_valid_transition(JobStatus::Processing, JobStatus::Pending));
        assert!(!is_valid_transition(JobStatus::Completed, JobStatus::Pending));
        assert!(!is_valid_transition(JobStatus::Failed, JobStatus::Processing));
        assert!(!is_valid_transition(JobStatus::Pending, JobStatus::Completed));
    }
}
