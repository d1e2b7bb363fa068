//! BuiltWith provider: technology stack detected on a company's website.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use enrich_core::{
    ApiKey, CompanyPatch, EnrichmentPayload, EnrichmentProvider, EntityLookup, EntityType, Error,
    Result, Service, Technology,
};

use crate::http::{endpoint, send_json};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuiltWithResponse {
    pub technologies: Vec<BuiltWithTechnology>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuiltWithTechnology {
    pub name: String,
    pub category: Option<String>,
    pub first_detected: Option<DateTime<Utc>>,
    pub last_detected: Option<DateTime<Utc>>,
}

/// BuiltWith domain lookup client.
pub struct BuiltWithProvider {
    client: Client,
    base_url: String,
}

impl BuiltWithProvider {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl EnrichmentProvider for BuiltWithProvider {
    fn service(&self) -> Service {
        Service::BuiltWith
    }

    fn supports(&self, entity_type: EntityType) -> bool {
        entity_type == EntityType::Company
    }

    async fn fetch(&self, key: &ApiKey, entity: &EntityLookup) -> Result<JsonValue> {
        let domain = entity.domain().ok_or_else(|| {
            Error::Validation(format!("company {} has no website", entity.entity_id))
        })?;
        let request = self
            .client
            .get(endpoint(&self.base_url, "/v21/api.json"))
            .query(&[("KEY", key.secret()), ("LOOKUP", domain)]);
        send_json(Service::BuiltWith, request).await
    }

    fn normalize(&self, _entity: &EntityLookup, raw: JsonValue) -> Result<EnrichmentPayload> {
        let response: BuiltWithResponse = serde_json::from_value(raw)?;
        let technologies: Vec<Technology> = response
            .technologies
            .into_iter()
            .filter(|t| !t.name.trim().is_empty())
            .map(|t| Technology {
                name: t.name,
                category: t.category,
                first_detected: t.first_detected,
                last_detected: t.last_detected,
            })
            .collect();

        Ok(EnrichmentPayload {
            company: Some(CompanyPatch {
                tech_stack: Some(serde_json::to_value(technologies)?),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_builds_tech_stack() {
        let provider = BuiltWithProvider::new(Client::new(), "http://localhost");
        let raw = json!({
            "technologies": [
                {"name": "Rust", "category": "Language", "firstDetected": "2021-01-01T00:00:00Z"},
                {"name": "  "},
                {"name": "nginx", "category": "Web Server"}
            ],
            "hosting": {"provider": "aws", "details": {}}
        });

        let payload = provider.normalize(&EntityLookup::default(), raw).unwrap();
        let stack = payload.company.unwrap().tech_stack.unwrap();
        let items = stack.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["name"], "Rust");
        assert_eq!(items[1]["category"], "Web Server");
    }

    #[test]
    fn test_contacts_unsupported() {
        let provider = BuiltWithProvider::new(Client::new(), "http://localhost");
        assert!(provider.supports(EntityType::Company));
        assert!(!provider.supports(EntityType::Contact));
    }
}
