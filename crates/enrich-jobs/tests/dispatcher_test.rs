//! Dispatcher and worker behavior over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use enrich_db::InMemoryStore;
use enrich_jobs::{
    ApiKeyRepository, ApiKeySecret, CompanyPatch, CompanyRecord, ContactPatch, ContactRecord,
    ContactUpsert, Dispatcher, EnqueueOptions, EnrichmentJob, EnrichmentPayload, EntityRepository,
    EntityType, Error, JobRepository, JobStatus, JobWorker, Outcome, Service, TickResult,
    UpsertApiKeyRequest, WorkerConfig, WorkerEvent,
};
use enrich_providers::mock::{MockBehavior, MockProvider};

const WORKER: &str = "worker-test";

async fn add_key(store: &InMemoryStore, service: Service) {
    store
        .upsert(UpsertApiKeyRequest {
            service,
            secret: ApiKeySecret::Plain(format!("{service}-key")),
            is_active: true,
        })
        .await
        .unwrap();
}

fn add_company(store: &InMemoryStore, name: &str) -> Uuid {
    store
        .insert_company(
            CompanyRecord::new(name)
                .with_website(format!("https://{}.example", name.to_lowercase()))
                .with_linkedin_url(format!("https://linkedin.com/company/{name}")),
        )
        .unwrap()
}

fn dispatcher(store: &InMemoryStore, providers: &[&MockProvider]) -> Dispatcher {
    providers.iter().fold(
        Dispatcher::from_store(store.clone()),
        |dispatcher, provider| dispatcher.with_provider(Arc::new((*provider).clone())),
    )
}

fn apollo_payload(company_id: Uuid) -> EnrichmentPayload {
    EnrichmentPayload {
        company: Some(CompanyPatch {
            industry: Some("Aerospace".into()),
            employee_count_min: Some(50),
            employee_count_max: Some(200),
            ..Default::default()
        }),
        contact: None,
        contacts: vec![
            ContactUpsert {
                email: "ann@acme.example".into(),
                company_id: Some(company_id),
                fields: ContactPatch {
                    first_name: Some("Ann".into()),
                    title: Some("CTO".into()),
                    ..Default::default()
                },
            },
            ContactUpsert {
                email: "bob@acme.example".into(),
                company_id: Some(company_id),
                fields: ContactPatch {
                    first_name: Some("Bob".into()),
                    ..Default::default()
                },
            },
        ],
    }
}

fn processed(result: TickResult) -> (EnrichmentJob, Outcome) {
    match result {
        TickResult::Processed { job, outcome } => (job, outcome),
        TickResult::Empty => panic!("expected a processed job"),
    }
}

#[tokio::test]
async fn test_transient_failure_reschedules_then_other_job_runs() {
    let store = InMemoryStore::new();
    let t0 = Utc::now();
    store.set_clock(Some(t0)).unwrap();
    add_key(&store, Service::Apollo).await;
    add_key(&store, Service::BuiltWith).await;
    let company = add_company(&store, "Acme");

    let apollo = MockProvider::new(Service::Apollo).then(MockBehavior::Transient("502".into()));
    let builtwith =
        MockProvider::new(Service::BuiltWith).then(MockBehavior::Transient("503".into()));
    let dispatcher = dispatcher(&store, &[&apollo, &builtwith]);

    let jobs = dispatcher
        .enqueue_for_entity(EntityType::Company, company, EnqueueOptions::default())
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Pending && j.priority == 1));

    let (first, outcome) = processed(dispatcher.tick(WORKER).await.unwrap());
    assert!(matches!(outcome, Outcome::RetryableFailure(_)));
    assert_eq!(first.status, JobStatus::Pending);
    assert_eq!(first.retry_count, 1);
    assert_eq!(first.scheduled_for, t0 + chrono::Duration::seconds(60));
    assert!(first.locked_by.is_none());

    let (second, _) = processed(dispatcher.tick(WORKER).await.unwrap());
    assert_ne!(second.id, first.id);
    assert_ne!(second.service, first.service);

    assert_eq!(dispatcher.tick(WORKER).await.unwrap(), TickResult::Empty);

    // After the backoff both succeed on the default behavior.
    store.advance(chrono::Duration::seconds(60)).unwrap();
    for _ in 0..2 {
        let (job, outcome) = processed(dispatcher.tick(WORKER).await.unwrap());
        assert!(outcome.is_success());
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retry_count, 1);
    }
    assert_eq!(apollo.call_count(), 2);
    assert_eq!(builtwith.call_count(), 2);
}

#[tokio::test]
async fn test_claims_follow_priority() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Apollo).await;
    let provider = MockProvider::new(Service::Apollo);
    let dispatcher = dispatcher(&store, &[&provider]);

    for (name, priority) in [("One", 1), ("Five", 5), ("Three", 3)] {
        let id = add_company(&store, name);
        dispatcher
            .enqueue_for_entity(
                EntityType::Company,
                id,
                EnqueueOptions {
                    priority: Some(priority),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let mut order = Vec::new();
    while let TickResult::Processed { job, .. } = dispatcher.tick(WORKER).await.unwrap() {
        order.push(job.priority);
    }
    assert_eq!(order, vec![5, 3, 1]);
}

#[tokio::test]
async fn test_future_job_not_claimed_early() {
    let store = InMemoryStore::new();
    let now = Utc::now();
    store.set_clock(Some(now)).unwrap();
    add_key(&store, Service::Apollo).await;
    let company = add_company(&store, "Later");
    let provider = MockProvider::new(Service::Apollo);
    let dispatcher = dispatcher(&store, &[&provider]);

    let mut job = dispatcher
        .enqueue_for_entity(EntityType::Company, company, EnqueueOptions::default())
        .await
        .unwrap()
        .remove(0);
    job.scheduled_for = now + chrono::Duration::hours(1);
    store.insert_job(job.clone()).unwrap();

    assert_eq!(dispatcher.tick(WORKER).await.unwrap(), TickResult::Empty);
    assert_eq!(provider.call_count(), 0);

    store.advance(chrono::Duration::hours(1)).unwrap();
    let (claimed, _) = processed(dispatcher.tick(WORKER).await.unwrap());
    assert_eq!(claimed.id, job.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Apollo).await;
    let company = add_company(&store, "Contested");
    store
        .enqueue(enrich_jobs::EnqueueRequest::new(
            EntityType::Company,
            company,
            vec![Service::Apollo],
        ))
        .await
        .unwrap();

    let claims = (0..16).map(|i| {
        let store = store.clone();
        tokio::spawn(async move { store.claim_next(&format!("worker-{i}")).await })
    });
    let results = futures::future::join_all(claims).await;

    let winners = results
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(Option::is_some)
        .count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_redispatching_same_payload_is_idempotent() {
    let store = InMemoryStore::new();
    store.set_clock(Some(Utc::now())).unwrap();
    add_key(&store, Service::Apollo).await;
    let company = add_company(&store, "Acme");
    let provider = MockProvider::new(Service::Apollo)
        .with_default(MockBehavior::Succeed(apollo_payload(company)));
    let dispatcher = dispatcher(&store, &[&provider]);

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        dispatcher
            .enqueue_for_entity(EntityType::Company, company, EnqueueOptions::default())
            .await
            .unwrap();
        let (_, outcome) = processed(dispatcher.tick(WORKER).await.unwrap());
        assert!(outcome.is_success());
        snapshots.push((
            store.get_company(company).await.unwrap().unwrap(),
            store.contacts().unwrap(),
        ));
    }

    assert_eq!(snapshots[0], snapshots[1]);
    let (record, contacts) = &snapshots[1];
    assert_eq!(record.industry.as_deref(), Some("Aerospace"));
    assert_eq!(contacts.len(), 2);
    assert!(contacts
        .iter()
        .all(|c| c.is_verified && c.verification_method.as_deref() == Some("apollo")));
}

#[tokio::test]
async fn test_missing_credentials_is_fatal() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Apollo).await;
    let company = add_company(&store, "Acme");
    let provider = MockProvider::new(Service::Apollo);
    let dispatcher = dispatcher(&store, &[&provider]);

    dispatcher
        .enqueue_for_entity(EntityType::Company, company, EnqueueOptions::default())
        .await
        .unwrap();
    store.set_active(Service::Apollo, false).await.unwrap();

    let (job, outcome) = processed(dispatcher.tick(WORKER).await.unwrap());
    assert!(matches!(outcome, Outcome::FatalFailure(_)));
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert!(job.last_error.unwrap().starts_with("MissingCredentials"));
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_retries_exhaust_to_failed() {
    let store = InMemoryStore::new();
    store.set_clock(Some(Utc::now())).unwrap();
    add_key(&store, Service::Apollo).await;
    let company = add_company(&store, "Flaky");
    let provider = MockProvider::new(Service::Apollo)
        .with_default(MockBehavior::Transient("upstream down".into()));
    let dispatcher = dispatcher(&store, &[&provider]);

    dispatcher
        .enqueue_for_entity(
            EntityType::Company,
            company,
            EnqueueOptions {
                max_retries: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let (job, _) = processed(dispatcher.tick(WORKER).await.unwrap());
    assert_eq!((job.status, job.retry_count), (JobStatus::Pending, 1));

    store.advance(chrono::Duration::hours(2)).unwrap();
    let (job, _) = processed(dispatcher.tick(WORKER).await.unwrap());
    assert_eq!((job.status, job.retry_count), (JobStatus::Failed, 2));

    store.advance(chrono::Duration::hours(2)).unwrap();
    assert_eq!(dispatcher.tick(WORKER).await.unwrap(), TickResult::Empty);
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn test_unsupported_entity_type_is_fatal() {
    let store = InMemoryStore::new();
    add_key(&store, Service::BuiltWith).await;
    let contact = store
        .insert_contact(ContactRecord::new("ann@acme.example"))
        .unwrap();
    let provider = MockProvider::new(Service::BuiltWith).only(&[EntityType::Company]);
    let dispatcher = dispatcher(&store, &[&provider]);

    dispatcher
        .enqueue_for_entity(EntityType::Contact, contact, EnqueueOptions::default())
        .await
        .unwrap();

    let (job, outcome) = processed(dispatcher.tick(WORKER).await.unwrap());
    assert!(matches!(outcome, Outcome::FatalFailure(_)));
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_slow_provider_times_out_as_retryable() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Scrapin).await;
    let company = add_company(&store, "Slow");
    let provider = MockProvider::new(Service::Scrapin).then(MockBehavior::Slow(
        Duration::from_secs(30),
        EnrichmentPayload::default(),
    ));
    let dispatcher =
        dispatcher(&store, &[&provider]).with_timeout(Duration::from_millis(50));

    dispatcher
        .enqueue_for_entity(EntityType::Company, company, EnqueueOptions::default())
        .await
        .unwrap();

    let (job, outcome) = processed(dispatcher.tick(WORKER).await.unwrap());
    assert!(matches!(outcome, Outcome::RetryableFailure(ref e) if e.contains("timeout")));
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);
}

#[tokio::test]
async fn test_stale_claim_reclaimed_once() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Apollo).await;
    let company = add_company(&store, "Abandoned");
    let dispatcher = dispatcher(&store, &[&MockProvider::new(Service::Apollo)]);

    store.set_clock(Some(Utc::now())).unwrap();
    dispatcher
        .enqueue_for_entity(EntityType::Company, company, EnqueueOptions::default())
        .await
        .unwrap();
    let claimed = store.claim_next("dead-worker").await.unwrap().unwrap();

    // The worker never comes back.
    store.advance(chrono::Duration::minutes(11)).unwrap();

    let reclaimed = dispatcher
        .reclaim_stale(Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, claimed.id);
    assert_eq!(reclaimed[0].status, JobStatus::Pending);
    assert_eq!(reclaimed[0].retry_count, claimed.retry_count + 1);
    assert!(reclaimed[0]
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("StaleClaim"));

    assert!(dispatcher
        .reclaim_stale(Duration::from_secs(600))
        .await
        .unwrap()
        .is_empty());

    let late = store.mark_completed(claimed.id, "dead-worker").await;
    assert!(matches!(late, Err(Error::ClaimLost(_))));
}

#[tokio::test]
async fn test_reclaim_window_must_exceed_dispatch_timeout() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Apollo).await;
    let company = add_company(&store, "Busy");
    let dispatcher = dispatcher(&store, &[&MockProvider::new(Service::Apollo)])
        .with_timeout(Duration::from_secs(120));

    store.set_clock(Some(Utc::now())).unwrap();
    dispatcher
        .enqueue_for_entity(EntityType::Company, company, EnqueueOptions::default())
        .await
        .unwrap();
    let claimed = store.claim_next("busy-worker").await.unwrap().unwrap();
    store.advance(chrono::Duration::seconds(90)).unwrap();

    for secs in [1, 60, 120] {
        let err = dispatcher
            .reclaim_stale(Duration::from_secs(secs))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "window {secs}s");
    }

    let still_held = store.get(claimed.id).await.unwrap().unwrap();
    assert_eq!(still_held.status, JobStatus::Processing);
    assert_eq!(still_held.locked_by.as_deref(), Some("busy-worker"));
    assert_eq!(still_held.retry_count, 0);
}

#[tokio::test]
async fn test_reclaim_window_out_of_range_is_rejected() {
    let store = InMemoryStore::new();
    let dispatcher = dispatcher(&store, &[]);

    let err = dispatcher
        .reclaim_stale(Duration::from_secs(1_000_000_000_000_000))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = dispatcher
        .reclaim_stale(Duration::from_secs(
            enrich_jobs::defaults::JOB_STALE_AFTER_MAX_SECS + 1,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_configured_window_always_reclaimable() {
    let store = InMemoryStore::new();
    let config = WorkerConfig::default().with_stale_after(u64::MAX);
    let dispatcher = dispatcher(&store, &[]).with_timeout(config.job_timeout());

    let reclaimed = dispatcher.reclaim_stale(config.stale_after()).await.unwrap();
    assert!(reclaimed.is_empty());
}

#[tokio::test]
async fn test_enqueue_rejections() {
    let store = InMemoryStore::new();
    let company = add_company(&store, "Acme");
    let dispatcher = dispatcher(&store, &[]);

    let missing = dispatcher
        .enqueue_for_entity(EntityType::Company, Uuid::now_v7(), EnqueueOptions::default())
        .await;
    assert!(matches!(missing, Err(Error::Validation(_))));

    let no_keys = dispatcher
        .enqueue_for_entity(EntityType::Company, company, EnqueueOptions::default())
        .await;
    assert!(matches!(no_keys, Err(Error::Validation(_))));

    add_key(&store, Service::Apollo).await;
    let inactive = dispatcher
        .enqueue_for_entity(
            EntityType::Company,
            company,
            EnqueueOptions {
                services: Some(vec![Service::Scrapin]),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(inactive, Err(Error::Validation(_))));

    let negative = dispatcher
        .enqueue_for_entity(
            EntityType::Company,
            company,
            EnqueueOptions {
                max_retries: Some(-1),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(negative, Err(Error::Validation(_))));
    assert!(store.list_eligible(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_key_usage_recorded() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Apollo).await;
    let company = add_company(&store, "Acme");
    let provider = MockProvider::new(Service::Apollo);
    let dispatcher = dispatcher(&store, &[&provider]);

    dispatcher
        .enqueue_for_entity(EntityType::Company, company, EnqueueOptions::default())
        .await
        .unwrap();
    dispatcher.tick(WORKER).await.unwrap();

    let key = store.get_active(Service::Apollo).await.unwrap().unwrap();
    assert!(key.last_used_at.is_some());
    assert_eq!(provider.calls()[0].secret, "apollo-key");
}

#[tokio::test]
async fn test_worker_processes_queue_and_stops() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Apollo).await;
    let company = add_company(&store, "Acme");
    let dispatcher = dispatcher(&store, &[&MockProvider::new(Service::Apollo)]);

    let config = WorkerConfig::default()
        .with_poll_interval(10)
        .with_worker_id("bg-worker");
    let handle = JobWorker::new(dispatcher.clone(), config).start();
    let mut events = handle.events();

    // Enqueued after subscribing so the completion event cannot be missed.
    let job = dispatcher
        .enqueue_for_entity(EntityType::Company, company, EnqueueOptions::default())
        .await
        .unwrap()
        .remove(0);

    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(WorkerEvent::JobCompleted { job_id, .. }) => return job_id,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(completed, job.id);

    handle.shutdown().await.unwrap();
    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(WorkerEvent::WorkerStopped) = events.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(stopped.is_ok());

    let stored = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
}
