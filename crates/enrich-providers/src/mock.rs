//! Scripted provider for deterministic dispatcher and API tests.
//!
//! ```rust,ignore
//! use enrich_providers::mock::{MockBehavior, MockProvider};
//!
//! let provider = MockProvider::new(Service::Apollo)
//!     .then(MockBehavior::Transient("502".into()))
//!     .with_default(MockBehavior::Succeed(EnrichmentPayload::default()));
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use enrich_core::{
    ApiKey, EnrichmentPayload, EnrichmentProvider, EntityLookup, EntityType, Error, Result,
    Service,
};

/// What the next call returns.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Succeed(EnrichmentPayload),
    /// Fails with a retryable provider error.
    Transient(String),
    /// Fails with a non-retryable error.
    Fatal(String),
    /// Sleeps before succeeding.
    Slow(Duration, EnrichmentPayload),
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub entity: EntityLookup,
    pub secret: String,
}

#[derive(Debug)]
struct Script {
    queue: VecDeque<MockBehavior>,
    default: MockBehavior,
}

/// Provider returning scripted results. Clones share the script and call log.
#[derive(Clone)]
pub struct MockProvider {
    service: Service,
    entity_types: Vec<EntityType>,
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockProvider {
    pub fn new(service: Service) -> Self {
        Self {
            service,
            entity_types: vec![EntityType::Company, EntityType::Contact],
            script: Arc::new(Mutex::new(Script {
                queue: VecDeque::new(),
                default: MockBehavior::Succeed(EnrichmentPayload::default()),
            })),
            calls: Arc::default(),
        }
    }

    /// Queue a behavior for the next unscripted call.
    pub fn then(self, behavior: MockBehavior) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.queue.push_back(behavior);
        }
        self
    }

    /// Behavior once the queue is drained.
    pub fn with_default(self, behavior: MockBehavior) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.default = behavior;
        }
        self
    }

    pub fn only(mut self, entity_types: &[EntityType]) -> Self {
        self.entity_types = entity_types.to_vec();
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    fn next_behavior(&self) -> Result<MockBehavior> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| Error::Internal("mock script lock poisoned".into()))?;
        Ok(script
            .queue
            .pop_front()
            .unwrap_or_else(|| script.default.clone()))
    }
}

#[async_trait]
impl EnrichmentProvider for MockProvider {
    fn service(&self) -> Service {
        self.service
    }

    fn supports(&self, entity_type: EntityType) -> bool {
        self.entity_types.contains(&entity_type)
    }

    async fn fetch(&self, key: &ApiKey, entity: &EntityLookup) -> Result<JsonValue> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MockCall {
                entity: entity.clone(),
                secret: key.secret(),
            });
        }

        match self.next_behavior()? {
            MockBehavior::Succeed(payload) => Ok(serde_json::to_value(payload)?),
            MockBehavior::Slow(delay, payload) => {
                tokio::time::sleep(delay).await;
                Ok(serde_json::to_value(payload)?)
            }
            MockBehavior::Transient(msg) => Err(Error::Provider(msg)),
            MockBehavior::Fatal(msg) => Err(Error::Validation(msg)),
        }
    }

    fn normalize(&self, _entity: &EntityLookup, raw: JsonValue) -> Result<EnrichmentPayload> {
        Ok(serde_json::from_value(raw)?)
    }
}
