//! Apollo provider: firmographics plus the people working at a company.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use enrich_core::{
    defaults, ApiKey, CompanyPatch, ContactPatch, ContactUpsert, EnrichmentPayload,
    EnrichmentProvider, EntityLookup, EntityType, Error, Result, Service,
};

use crate::http::{endpoint, send_json};

/// Organization enrichment response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApolloCompanyResponse {
    pub company_info: ApolloCompanyInfo,
    pub contacts: Vec<ApolloPerson>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApolloCompanyInfo {
    pub name: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub employee_count: Range,
    pub revenue: Range,
    pub founded_year: Option<i32>,
    pub social_profiles: SocialProfiles,
    pub description: Option<String>,
    pub location: Location,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Range {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SocialProfiles {
    pub linkedin: Option<String>,
    pub twitter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Location {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApolloPerson {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub department: Option<String>,
    pub linkedin_url: Option<String>,
    pub twitter_url: Option<String>,
}

impl ApolloPerson {
    fn patch(&self) -> ContactPatch {
        ContactPatch {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            title: self.title.clone(),
            department: self.department.clone(),
            linkedin_url: self.linkedin_url.clone(),
            twitter_url: self.twitter_url.clone(),
        }
    }
}

/// People match response.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApolloPersonResponse {
    pub person: Option<ApolloPerson>,
}

/// Apollo REST client.
pub struct ApolloProvider {
    client: Client,
    base_url: String,
}

impl ApolloProvider {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn post(&self, path: &str, key: &ApiKey, body: JsonValue) -> reqwest::RequestBuilder {
        self.client
            .post(endpoint(&self.base_url, path))
            .header("X-Api-Key", key.secret())
            .header("Cache-Control", "no-cache")
            .json(&body)
    }
}

fn to_i32(v: Option<i64>) -> Option<i32> {
    v.and_then(|n| i32::try_from(n).ok())
}

#[async_trait]
impl EnrichmentProvider for ApolloProvider {
    fn service(&self) -> Service {
        Service::Apollo
    }

    fn supports(&self, _entity_type: EntityType) -> bool {
        true
    }

    async fn fetch(&self, key: &ApiKey, entity: &EntityLookup) -> Result<JsonValue> {
        if entity.is_company() {
            let domain = entity.domain().ok_or_else(|| {
                Error::Validation(format!("company {} has no website", entity.entity_id))
            })?;
            debug!(
                subsystem = "providers",
                service = "apollo",
                domain = %domain,
                "Enriching organization"
            );
            send_json(
                Service::Apollo,
                self.post(
                    "/organizations/enrich",
                    key,
                    json!({
                        "domain": domain,
                        "per_page": defaults::APOLLO_PEOPLE_PER_PAGE,
                    }),
                ),
            )
            .await
        } else {
            let email = entity.email.as_deref().ok_or_else(|| {
                Error::Validation(format!("contact {} has no email", entity.entity_id))
            })?;
            send_json(
                Service::Apollo,
                self.post("/people/match", key, json!({ "email": email })),
            )
            .await
        }
    }

    fn normalize(&self, entity: &EntityLookup, raw: JsonValue) -> Result<EnrichmentPayload> {
        if !entity.is_company() {
            let response: ApolloPersonResponse = serde_json::from_value(raw)?;
            let person = response
                .person
                .ok_or_else(|| Error::NotFound("apollo returned no matching person".into()))?;
            return Ok(EnrichmentPayload {
                contact: Some(person.patch()),
                ..Default::default()
            });
        }

        let response: ApolloCompanyResponse = serde_json::from_value(raw)?;
        let info = response.company_info;
        let company = CompanyPatch {
            name: info.name,
            industry: info.industry,
            employee_count_min: to_i32(info.employee_count.min),
            employee_count_max: to_i32(info.employee_count.max),
            annual_revenue_min: info.revenue.min,
            annual_revenue_max: info.revenue.max,
            founded_year: info.founded_year,
            linkedin_url: info.social_profiles.linkedin,
            twitter_url: info.social_profiles.twitter,
            description: info.description,
            headquarters_city: info.location.city,
            headquarters_state: info.location.state,
            headquarters_country: info.location.country,
            tech_stack: None,
        };

        // People without an email cannot be keyed and are skipped.
        let contacts = response
            .contacts
            .iter()
            .filter_map(|p| {
                p.email.as_ref().map(|email| ContactUpsert {
                    email: email.clone(),
                    company_id: Some(entity.entity_id),
                    fields: p.patch(),
                })
            })
            .collect();

        Ok(EnrichmentPayload {
            company: Some(company),
            contact: None,
            contacts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn provider() -> ApolloProvider {
        ApolloProvider::new(Client::new(), "http://localhost")
    }

    fn company_lookup() -> EntityLookup {
        EntityLookup {
            entity_type: Some(EntityType::Company),
            entity_id: Uuid::now_v7(),
            name: Some("Acme".into()),
            website: Some("acme.io".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_company_maps_fields() {
        let entity = company_lookup();
        let raw = json!({
            "companyInfo": {
                "name": "Acme Inc",
                "industry": "Aerospace",
                "employeeCount": {"min": 50, "max": 200},
                "revenue": {"min": 1000000, "max": 5000000},
                "foundedYear": 1999,
                "socialProfiles": {"linkedin": "https://linkedin.com/company/acme"},
                "description": "Rockets",
                "location": {"city": "Austin", "state": "TX", "country": "US"}
            },
            "contacts": [
                {"firstName": "Ann", "email": "ann@acme.io", "title": "CTO"},
                {"firstName": "NoEmail"}
            ]
        });

        let payload = provider().normalize(&entity, raw).unwrap();
        let company = payload.company.unwrap();
        assert_eq!(company.name.as_deref(), Some("Acme Inc"));
        assert_eq!(company.employee_count_max, Some(200));
        assert_eq!(company.annual_revenue_min, Some(1_000_000));
        assert_eq!(company.headquarters_country.as_deref(), Some("US"));
        assert_eq!(payload.contacts.len(), 1);
        assert_eq!(payload.contacts[0].company_id, Some(entity.entity_id));
    }

    #[test]
    fn test_normalize_tolerates_missing_sections() {
        let payload = provider()
            .normalize(&company_lookup(), json!({}))
            .unwrap();
        assert!(payload.contacts.is_empty());
        assert_eq!(payload.company.unwrap().name, None);
    }

    #[test]
    fn test_normalize_contact_without_person_is_not_found() {
        let entity = EntityLookup {
            entity_type: Some(EntityType::Contact),
            email: Some("x@y.io".into()),
            ..Default::default()
        };
        let err = provider().normalize(&entity, json!({"person": null})).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_employee_count_out_of_range_dropped() {
        assert_eq!(to_i32(Some(i64::MAX)), None);
        assert_eq!(to_i32(Some(42)), Some(42));
    }
}
