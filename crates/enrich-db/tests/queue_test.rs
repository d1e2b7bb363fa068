//! PostgreSQL queue tests.
//!
//! Each test runs in its own schema. Tests return early when `DATABASE_URL`
//! is not set.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use enrich_db::test_fixtures::TestDatabase;
use enrich_db::{
    EnqueueRequest, EntityType, Error, JobFilter, JobRepository, JobStatus, RetryPolicy, Service,
};

async fn test_db() -> Option<TestDatabase> {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").ok()?;
    let policy = RetryPolicy::new(Duration::from_secs(30), Duration::from_secs(3600));
    Some(
        TestDatabase::connect(&url, policy)
            .await
            .expect("Failed to create test database"),
    )
}

#[tokio::test]
async fn test_claim_order_priority_then_schedule() {
    let Some(t) = test_db().await else { return };
    let company = t.company("Ordering Co").await.unwrap();

    for priority in [1, 5, 3] {
        t.db.jobs
            .enqueue(
                EnqueueRequest::new(EntityType::Company, company.id, vec![Service::Apollo])
                    .with_priority(priority),
            )
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    while let Some(job) = t.db.jobs.claim_next("worker-1").await.unwrap() {
        seen.push(job.priority);
    }
    assert_eq!(seen, vec![5, 3, 1]);

    t.cleanup().await;
}

#[tokio::test]
async fn test_concurrent_claims_yield_single_winner() {
    let Some(t) = test_db().await else { return };
    let company = t.company("Contended Co").await.unwrap();
    t.db.jobs
        .enqueue(EnqueueRequest::new(
            EntityType::Company,
            company.id,
            vec![Service::Scrapin],
        ))
        .await
        .unwrap();

    let claims = (0..8).map(|i| {
        let jobs = t.db.jobs.clone();
        tokio::spawn(async move { jobs.claim_next(&format!("worker-{i}")).await })
    });
    let results = futures::future::join_all(claims).await;

    let winners = results
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(Option::is_some)
        .count();
    assert_eq!(winners, 1);

    t.cleanup().await;
}

#[tokio::test]
async fn test_failed_job_not_claimable_before_backoff() {
    let Some(t) = test_db().await else { return };
    let company = t.company("Backoff Co").await.unwrap();
    let jobs = t
        .db
        .jobs
        .enqueue(EnqueueRequest::new(
            EntityType::Company,
            company.id,
            vec![Service::Apollo, Service::BuiltWith],
        ))
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);

    let first = t.db.jobs.claim_next("worker-1").await.unwrap().unwrap();
    let before = Utc::now();
    let failed = t
        .db
        .jobs
        .mark_failed(first.id, "worker-1", "ProviderError: 502")
        .await
        .unwrap();

    assert_eq!(failed.status, JobStatus::Pending);
    assert_eq!(failed.retry_count, 1);
    assert!(failed.locked_at.is_none() && failed.locked_by.is_none());
    assert!(failed.scheduled_for >= before + chrono::Duration::seconds(60));

    // Only the other job is claimable now.
    let second = t.db.jobs.claim_next("worker-1").await.unwrap().unwrap();
    assert_ne!(second.id, first.id);
    assert!(t.db.jobs.claim_next("worker-1").await.unwrap().is_none());

    t.cleanup().await;
}

#[tokio::test]
async fn test_retries_exhaust_to_failed() {
    let Some(t) = test_db().await else { return };
    let company = t.company("Flaky Co").await.unwrap();
    let job = t
        .db
        .jobs
        .enqueue(
            EnqueueRequest::new(EntityType::Company, company.id, vec![Service::Apollo])
                .with_max_retries(1),
        )
        .await
        .unwrap()
        .remove(0);

    t.db.jobs.claim_next("w").await.unwrap().unwrap();
    let failed = t.db.jobs.mark_failed(job.id, "w", "boom").await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert_eq!(failed.last_error.as_deref(), Some("boom"));

    let err = t.db.jobs.mark_failed(job.id, "w", "again").await.unwrap_err();
    assert!(matches!(err, Error::ClaimLost(_)));

    t.cleanup().await;
}

#[tokio::test]
async fn test_stale_claim_reclaimed_once() {
    let Some(t) = test_db().await else { return };
    let company = t.company("Crashed Co").await.unwrap();
    t.db.jobs
        .enqueue(EnqueueRequest::new(
            EntityType::Company,
            company.id,
            vec![Service::Scrapin],
        ))
        .await
        .unwrap();
    let job = t.db.jobs.claim_next("dead-worker").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reclaimed = t
        .db
        .jobs
        .reclaim_stale(chrono::Duration::milliseconds(10))
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, job.id);
    assert_eq!(reclaimed[0].retry_count, job.retry_count + 1);
    assert_eq!(reclaimed[0].status, JobStatus::Pending);
    assert!(reclaimed[0]
        .last_error
        .as_deref()
        .unwrap_or_default()
        .starts_with("StaleClaim"));

    // The dead worker's late completion is rejected.
    let err = t
        .db
        .jobs
        .mark_completed(job.id, "dead-worker")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ClaimLost(_)));

    let again = t
        .db
        .jobs
        .reclaim_stale(chrono::Duration::milliseconds(10))
        .await
        .unwrap();
    assert!(again.is_empty());

    t.cleanup().await;
}

#[tokio::test]
async fn test_list_filtered_and_stats() {
    let Some(t) = test_db().await else { return };
    let company = t.company("Stats Co").await.unwrap();
    t.db.jobs
        .enqueue(EnqueueRequest::new(
            EntityType::Company,
            company.id,
            vec![Service::Apollo, Service::BuiltWith, Service::Scrapin],
        ))
        .await
        .unwrap();
    let claimed = t.db.jobs.claim_next("w").await.unwrap().unwrap();
    t.db.jobs.mark_completed(claimed.id, "w").await.unwrap();

    let stats = t.db.jobs.queue_stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.eligible, 2);

    let pending = t
        .db
        .jobs
        .list_filtered(&JobFilter {
            status: Some(JobStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    let services: HashSet<Service> = pending.iter().map(|j| j.service).collect();
    assert_eq!(services.len(), 2);
    assert!(!services.contains(&claimed.service));

    assert_eq!(t.db.jobs.list_eligible(10).await.unwrap().len(), 2);

    t.cleanup().await;
}
