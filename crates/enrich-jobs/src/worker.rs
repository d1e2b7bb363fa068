//! Background worker polling the enrichment queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use enrich_core::{defaults, EnrichmentJob, Error, JobStatus, Result, Service};

use crate::dispatcher::{Dispatcher, Outcome};
use crate::DEFAULT_POLL_INTERVAL_MS;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Age after which a `processing` claim is reclaimed.
    pub stale_after_secs: u64,
    /// Bound on one dispatch. Always below the staleness window.
    pub job_timeout_secs: u64,
    /// Identity recorded in `locked_by`.
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
            stale_after_secs: defaults::JOB_STALE_AFTER_SECS,
            job_timeout_secs: defaults::JOB_TIMEOUT_SECS,
            worker_id: default_worker_id(),
        }
    }
}

fn default_worker_id() -> String {
    format!("worker-{}", Uuid::now_v7())
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `5000` | Polling interval when queue is empty |
    /// | `JOB_STALE_AFTER_SECS` | `600` | Claim age that triggers reclaim |
    /// | `JOB_TIMEOUT_SECS` | `120` | Dispatch timeout, clamped below the staleness window |
    /// | `JOB_WORKER_ID` | `worker-<uuid>` | Lock holder identity |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        let stale_after_secs = std::env::var("JOB_STALE_AFTER_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_STALE_AFTER_SECS);

        let job_timeout_secs = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_TIMEOUT_SECS);

        let worker_id = std::env::var("JOB_WORKER_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(default_worker_id);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            stale_after_secs,
            job_timeout_secs,
            worker_id,
        }
        .clamped()
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_stale_after(mut self, secs: u64) -> Self {
        self.stale_after_secs = secs;
        self.clamped()
    }

    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self.clamped()
    }

    /// Keep the staleness window within `JOB_STALE_AFTER_MAX_SECS` and the
    /// dispatch timeout strictly inside it.
    fn clamped(mut self) -> Self {
        self.stale_after_secs = self
            .stale_after_secs
            .clamp(2, defaults::JOB_STALE_AFTER_MAX_SECS);
        self.job_timeout_secs = self
            .job_timeout_secs
            .clamp(1, self.stale_after_secs - 1);
        self
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// How often the worker sweeps for stale claims.
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs((self.stale_after_secs / 4).max(1))
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was claimed and dispatch started.
    JobStarted { job_id: Uuid, service: Service },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, service: Service },
    /// A job failed and went back to the queue.
    JobRetryScheduled {
        job_id: Uuid,
        service: Service,
        retry_count: i32,
        error: String,
    },
    /// A job failed terminally.
    JobFailed {
        job_id: Uuid,
        service: Service,
        error: String,
    },
    /// Stale claims were returned to the queue.
    JobsReclaimed { count: usize },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

impl WorkerEvent {
    fn from_outcome(job: &EnrichmentJob, outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Success(_) => WorkerEvent::JobCompleted {
                job_id: job.id,
                service: job.service,
            },
            Outcome::RetryableFailure(error) if job.status == JobStatus::Pending => {
                WorkerEvent::JobRetryScheduled {
                    job_id: job.id,
                    service: job.service,
                    retry_count: job.retry_count,
                    error: error.clone(),
                }
            }
            Outcome::RetryableFailure(error) | Outcome::FatalFailure(error) => {
                WorkerEvent::JobFailed {
                    job_id: job.id,
                    service: job.service,
                    error: error.clone(),
                }
            }
        }
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Job worker that processes jobs from the queue.
pub struct JobWorker {
    dispatcher: Dispatcher,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    /// Create a new job worker. The dispatcher timeout follows the config.
    pub fn new(dispatcher: Dispatcher, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            dispatcher: dispatcher.with_timeout(config.job_timeout()),
            config,
            event_tx,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let worker = Arc::new(self);
        tokio::spawn(async move {
            worker.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Claims up to `max_concurrent_jobs` at a time and processes them
    /// concurrently. Only sleeps when the queue is empty.
    #[instrument(skip(self, shutdown_rx), fields(worker_id = %self.config.worker_id))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            stale_after_secs = self.config.stale_after_secs,
            job_timeout_secs = self.config.job_timeout_secs,
            "Job worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let reclaim_interval = self.config.reclaim_interval();
        let mut last_reclaim: Option<Instant> = None;

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }

            if last_reclaim.map_or(true, |at| at.elapsed() >= reclaim_interval) {
                self.reclaim().await;
                last_reclaim = Some(Instant::now());
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..self.config.max_concurrent_jobs {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let dispatcher = self.dispatcher.clone();
                        let event_tx = self.event_tx.clone();
                        let worker_id = self.config.worker_id.clone();
                        tasks.spawn(async move {
                            execute_job(dispatcher, event_tx, worker_id, job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Job worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(claimed, "Processing concurrent job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    async fn claim_job(&self) -> Option<EnrichmentJob> {
        match self
            .dispatcher
            .jobs()
            .claim_next(&self.config.worker_id)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                error!(error = ?e, "Failed to claim job");
                None
            }
        }
    }

    async fn reclaim(&self) {
        match self.dispatcher.reclaim_stale(self.config.stale_after()).await {
            Ok(jobs) if !jobs.is_empty() => {
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobsReclaimed { count: jobs.len() });
            }
            Ok(_) => {}
            Err(e) => error!(error = ?e, "Failed to reclaim stale jobs"),
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }
}

/// Dispatch one claimed job and publish the resulting event.
async fn execute_job(
    dispatcher: Dispatcher,
    event_tx: broadcast::Sender<WorkerEvent>,
    worker_id: String,
    job: EnrichmentJob,
) {
    let job_id = job.id;
    let service = job.service;
    let _ = event_tx.send(WorkerEvent::JobStarted { job_id, service });

    match dispatcher.process(job, &worker_id).await {
        Ok((job, outcome)) => {
            let _ = event_tx.send(WorkerEvent::from_outcome(&job, &outcome));
        }
        Err(e) => {
            // The claim stays in place and is picked up by stale-claim recovery.
            warn!(%job_id, %service, error = %e, "Failed to record job outcome");
        }
    }
}
