//! Scrapin provider: LinkedIn company pages and member profiles.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use enrich_core::{
    ApiKey, CompanyPatch, ContactPatch, EnrichmentPayload, EnrichmentProvider, EntityLookup,
    EntityType, Error, Result, Service,
};

use crate::http::{endpoint, send_json};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrapinCompanyResponse {
    pub linkedin_data: LinkedinData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkedinData {
    pub company_info: LinkedinCompany,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkedinCompany {
    pub description: Option<String>,
    pub industry: Option<String>,
    pub employee_count: Option<i64>,
    pub headquarters: Option<String>,
    pub founded: Option<i32>,
    pub specialties: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScrapinProfileResponse {
    pub person: Option<LinkedinProfile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkedinProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub headline: Option<String>,
    pub linked_in_url: Option<String>,
}

/// Scrapin client.
pub struct ScrapinProvider {
    client: Client,
    base_url: String,
}

impl ScrapinProvider {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl EnrichmentProvider for ScrapinProvider {
    fn service(&self) -> Service {
        Service::Scrapin
    }

    fn supports(&self, _entity_type: EntityType) -> bool {
        true
    }

    async fn fetch(&self, key: &ApiKey, entity: &EntityLookup) -> Result<JsonValue> {
        let url = entity
            .linkedin_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                Error::Validation(format!("{} has no LinkedIn URL", entity.entity_id))
            })?;
        let path = if entity.is_company() {
            "/enrichment/company"
        } else {
            "/enrichment/profile"
        };
        let request = self
            .client
            .get(endpoint(&self.base_url, path))
            .query(&[("apikey", key.secret().as_str()), ("linkedInUrl", url)]);
        send_json(Service::Scrapin, request).await
    }

    fn normalize(&self, entity: &EntityLookup, raw: JsonValue) -> Result<EnrichmentPayload> {
        if !entity.is_company() {
            let response: ScrapinProfileResponse = serde_json::from_value(raw)?;
            let person = response
                .person
                .ok_or_else(|| Error::NotFound("scrapin returned no profile".into()))?;
            return Ok(EnrichmentPayload {
                contact: Some(ContactPatch {
                    first_name: person.first_name,
                    last_name: person.last_name,
                    title: person.headline,
                    linkedin_url: person.linked_in_url,
                    ..Default::default()
                }),
                ..Default::default()
            });
        }

        let response: ScrapinCompanyResponse = serde_json::from_value(raw)?;
        let info = response.linkedin_data.company_info;
        Ok(EnrichmentPayload {
            company: Some(CompanyPatch {
                description: info.description,
                industry: info.industry,
                employee_count_max: info.employee_count.and_then(|n| i32::try_from(n).ok()),
                founded_year: info.founded,
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}
