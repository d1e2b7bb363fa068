//! HTTP behavior of the API router over the in-memory store.

use std::sync::Arc;

use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use enrich_api::{app, AppState};
use enrich_core::{
    ApiKeyRepository, ApiKeySecret, CompanyPatch, CompanyRecord, EnrichmentPayload,
    JobRepository, Service, UpsertApiKeyRequest,
};
use enrich_db::InMemoryStore;
use enrich_jobs::Dispatcher;
use enrich_providers::mock::{MockBehavior, MockProvider};

struct TestServer {
    base_url: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(store: &InMemoryStore, providers: &[MockProvider]) -> Self {
        let dispatcher = providers
            .iter()
            .fold(Dispatcher::from_store(store.clone()), |d, p| {
                d.with_provider(Arc::new(p.clone()))
            });
        let router = app(AppState::new(dispatcher).with_worker_id("api-test"));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .put(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }
}

async fn add_key(store: &InMemoryStore, service: Service) {
    store
        .upsert(UpsertApiKeyRequest {
            service,
            secret: ApiKeySecret::Plain(format!("{service}-secret-value")),
            is_active: true,
        })
        .await
        .unwrap();
}

fn add_company(store: &InMemoryStore) -> Uuid {
    store
        .insert_company(CompanyRecord::new("Acme").with_website("https://acme.example"))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start(&InMemoryStore::new(), &[]).await;
    let response = server.client.get(server.url("/health")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_trigger_enqueues_active_services() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Apollo).await;
    add_key(&store, Service::BuiltWith).await;
    let company = add_company(&store);
    let server = TestServer::start(&store, &[]).await;

    let (status, body) = server
        .post("/api/enrich", json!({ "companyId": company }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (_, stats) = server.get("/api/v1/jobs/stats").await;
    assert_eq!(stats["pending"], 2);
    assert_eq!(stats["eligible"], 2);
}

#[tokio::test]
async fn test_trigger_rejections() {
    let store = InMemoryStore::new();
    let company = add_company(&store);
    let server = TestServer::start(&store, &[]).await;

    let (status, body) = server.post("/api/enrich", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Company ID is required");

    let (status, body) = server
        .post("/api/enrich", json!({ "companyId": company }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("no active API keys"));

    add_key(&store, Service::Apollo).await;
    let (status, body) = server
        .post("/api/enrich", json!({ "companyId": Uuid::now_v7() }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("does not exist"));

    let (status, body) = server
        .post("/api/enrich", json!({ "companyId": "not-a-uuid" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = server
        .post(
            "/api/enrich",
            json!({ "companyId": company, "services": ["apollo", "apollo"] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tick_on_empty_queue() {
    let server = TestServer::start(&InMemoryStore::new(), &[]).await;
    let (status, body) = server.post("/api/queue/process", json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["processed"], false);
    assert_eq!(body["message"], "No pending jobs");
}

#[tokio::test]
async fn test_tick_applies_payload() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Apollo).await;
    let company = add_company(&store);
    let apollo = MockProvider::new(Service::Apollo).with_default(MockBehavior::Succeed(
        EnrichmentPayload {
            company: Some(CompanyPatch {
                industry: Some("Aerospace".into()),
                ..Default::default()
            }),
            ..Default::default()
        },
    ));
    let server = TestServer::start(&store, &[apollo.clone()]).await;

    server
        .post("/api/enrich", json!({ "companyId": company }))
        .await;
    let (status, body) = server.post("/api/queue/process", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], true);
    assert_eq!(body["service"], "apollo");
    assert_eq!(body["status"], "completed");
    assert!(body.get("error").is_none());

    let (_, record) = server.get(&format!("/api/v1/companies/{company}")).await;
    assert_eq!(record["industry"], "Aerospace");
    assert!(!record["last_enrichment_date"].is_null());
    assert_eq!(apollo.calls()[0].secret, "apollo-secret-value");

    let (_, stats) = server.get("/api/v1/stats").await;
    assert_eq!(stats["companies"], 1);
    assert!(!stats["last_enrichment_date"].is_null());
}

#[tokio::test]
async fn test_tick_failure_is_sanitized() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Apollo).await;
    let company = add_company(&store);
    let apollo = MockProvider::new(Service::Apollo).then(MockBehavior::Transient(
        "upstream said: token apollo-secret-value rejected".into(),
    ));
    let server = TestServer::start(&store, &[apollo]).await;

    server
        .post("/api/enrich", json!({ "companyId": company }))
        .await;
    let (_, body) = server.post("/api/queue/process", json!({})).await;

    assert_eq!(body["status"], "pending");
    assert_eq!(body["retryCount"], 1);
    let error = body["error"].as_str().unwrap();
    assert!(error.starts_with("ProviderError"));
    assert!(!error.contains("apollo-secret-value"));

    let job_id = body["jobId"].as_str().unwrap();
    let (status, job) = server.get(&format!("/api/v1/jobs/{job_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!job["last_error"].as_str().unwrap().contains("apollo-secret-value"));
}

#[tokio::test]
async fn test_job_introspection() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Apollo).await;
    add_key(&store, Service::Scrapin).await;
    let company = add_company(&store);
    let server = TestServer::start(&store, &[]).await;

    server
        .post(
            "/api/enrich",
            json!({ "entityType": "company", "entityId": company, "priority": 7 }),
        )
        .await;

    let (_, jobs) = server.get("/api/v1/jobs?service=scrapin").await;
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["priority"], 7);

    let (_, eligible) = server.get("/api/v1/jobs/eligible?limit=1").await;
    assert_eq!(eligible.as_array().unwrap().len(), 1);

    let (status, body) = server.get("/api/v1/jobs?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = server
        .get(&format!("/api/v1/jobs/{}", Uuid::now_v7()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server.get("/api/v1/jobs/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manual_reclaim() {
    let store = InMemoryStore::new();
    add_key(&store, Service::Apollo).await;
    let company = add_company(&store);
    let server = TestServer::start(&store, &[]).await;

    store.set_clock(Some(Utc::now())).unwrap();
    server
        .post("/api/enrich", json!({ "companyId": company }))
        .await;
    store.claim_next("crashed-worker").await.unwrap().unwrap();
    store.advance(chrono::Duration::minutes(30)).unwrap();

    // Windows at or below the 120s dispatch timeout, and absurd ones, are refused.
    for secs in ["0", "60", "120", "1000000000000000"] {
        let (status, body) = server
            .post(
                &format!("/api/v1/jobs/reclaim?stale_after_secs={secs}"),
                json!({}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "stale_after_secs={secs}");
        assert_eq!(body["success"], false);
    }
    let (_, stats) = server.get("/api/v1/jobs/stats").await;
    assert_eq!(stats["processing"], 1);

    let (status, body) = server.post("/api/v1/jobs/reclaim", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reclaimed"], 1);
    assert_eq!(body["jobs"][0]["retry_count"], 1);
    assert_eq!(body["jobs"][0]["status"], "pending");

    let (_, body) = server.post("/api/v1/jobs/reclaim", json!({})).await;
    assert_eq!(body["reclaimed"], 0);
}

#[tokio::test]
async fn test_api_key_management() {
    let store = InMemoryStore::new();
    let server = TestServer::start(&store, &[]).await;

    let (status, body) = server
        .put(
            "/api/v1/api-keys",
            json!({ "service": "apollo", "secret": "sk-live-abcdef1234" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["masked_key"], "****1234");
    assert_eq!(body["is_active"], true);

    let (status, _) = server
        .put(
            "/api/v1/api-keys",
            json!({ "service": "builtwith", "secret": { "api_key": "bw-key-9876" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, keys) = server.get("/api/v1/api-keys").await;
    let text = keys.to_string();
    assert_eq!(keys.as_array().unwrap().len(), 2);
    assert!(!text.contains("sk-live-abcdef1234"));
    assert!(!text.contains("bw-key-9876"));

    let (status, body) = server
        .post("/api/v1/api-keys/apollo/deactivate", json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);
    assert!(store.get_active(Service::Apollo).await.unwrap().is_none());

    let (status, body) = server
        .post("/api/v1/api-keys/apollo/activate", json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], true);

    let (status, _) = server
        .post("/api/v1/api-keys/scrapin/activate", json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server
        .post("/api/v1/api-keys/clearbit/activate", json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .put("/api/v1/api-keys", json!({ "service": "apollo", "secret": "  " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_company_contacts() {
    let store = InMemoryStore::new();
    let company = add_company(&store);
    store
        .insert_contact(
            enrich_core::ContactRecord::new("ann@acme.example").with_company(company),
        )
        .unwrap();
    let server = TestServer::start(&store, &[]).await;

    let (status, contacts) = server
        .get(&format!("/api/v1/companies/{company}/contacts"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(contacts[0]["email"], "ann@acme.example");

    let contact_id = contacts[0]["id"].as_str().unwrap().to_string();
    let (status, _) = server.get(&format!("/api/v1/contacts/{contact_id}")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server
        .get(&format!("/api/v1/companies/{}/contacts", Uuid::now_v7()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
