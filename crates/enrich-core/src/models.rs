//! Data models for the enrichment queue and the records it enriches.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// ENUMS
// =============================================================================

/// Kind of record a job enriches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Company,
    Contact,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Company => "company",
            EntityType::Contact => "contact",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "company" => Ok(EntityType::Company),
            "contact" => Ok(EntityType::Contact),
            other => Err(Error::Validation(format!("unknown entity type: {other}"))),
        }
    }
}

/// External data provider a job is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Apollo,
    BuiltWith,
    Scrapin,
}

impl Service {
    /// Every supported provider, in a stable order.
    pub const ALL: [Service; 3] = [Service::Apollo, Service::BuiltWith, Service::Scrapin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Apollo => "apollo",
            Service::BuiltWith => "builtwith",
            Service::Scrapin => "scrapin",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "apollo" => Ok(Service::Apollo),
            "builtwith" => Ok(Service::BuiltWith),
            "scrapin" => Ok(Service::Scrapin),
            other => Err(Error::Validation(format!("unknown service: {other}"))),
        }
    }
}

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Validation(format!("unknown job status: {other}"))),
        }
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// A unit of enrichment work in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentJob {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub service: Service,
    pub priority: i32,
    pub status: JobStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnrichmentJob {
    /// Whether the job can be claimed at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_for <= now
    }

    /// Whether the job holds a processing claim taken before `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing && self.locked_at.is_some_and(|at| at < cutoff)
    }

    /// Whether `worker_id` currently holds the claim on this job.
    pub fn is_locked_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Processing && self.locked_by.as_deref() == Some(worker_id)
    }
}

/// Request to create one job per service for a single entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub services: Vec<Service>,
    pub priority: i32,
    pub max_retries: i32,
}

impl EnqueueRequest {
    pub fn new(entity_type: EntityType, entity_id: Uuid, services: Vec<Service>) -> Self {
        Self {
            entity_type,
            entity_id,
            services,
            priority: defaults::JOB_PRIORITY,
            max_retries: defaults::JOB_MAX_RETRIES,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Reject requests that must never reach the store.
    pub fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            return Err(Error::Validation("services must not be empty".into()));
        }
        let mut seen = Vec::with_capacity(self.services.len());
        for service in &self.services {
            if seen.contains(service) {
                return Err(Error::Validation(format!("duplicate service: {service}")));
            }
            seen.push(*service);
        }
        if self.max_retries < 0 {
            return Err(Error::Validation("max_retries must be >= 0".into()));
        }
        Ok(())
    }
}

/// Filters for listing jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub service: Option<Service>,
    pub entity_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl JobFilter {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(defaults::PAGE_LIMIT)
            .clamp(0, defaults::PAGE_LIMIT_MAX)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, job: &EnrichmentJob) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.service.map_or(true, |s| job.service == s)
            && self.entity_id.map_or(true, |id| job.entity_id == id)
    }
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    /// Pending jobs whose `scheduled_for` has passed.
    pub eligible: i64,
    pub total: i64,
}

// =============================================================================
// API KEYS
// =============================================================================

/// Provider credentials as stored by the settings page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub service: Service,
    /// Raw stored value: a plain key or a JSON object carrying one.
    pub api_key: String,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    /// The secret to send to the provider.
    ///
    /// Structured values are JSON objects; the first of `api_key`, `apiKey`,
    /// `key` or `token` holding a string is used.
    pub fn secret(&self) -> String {
        let trimmed = self.api_key.trim();
        if trimmed.starts_with('{') {
            if let Some(secret) = structured_secret(trimmed) {
                return secret;
            }
        }
        trimmed.to_string()
    }

    /// Key with the secret masked, for listings.
    pub fn summary(&self) -> ApiKeySummary {
        ApiKeySummary {
            id: self.id,
            service: self.service,
            masked_key: mask_secret(&self.secret()),
            is_active: self.is_active,
            last_used_at: self.last_used_at,
            updated_at: self.updated_at,
        }
    }
}

/// Secret carried by a structured (JSON object) key value.
fn structured_secret(raw: &str) -> Option<String> {
    let parsed: serde_json::Map<String, JsonValue> = serde_json::from_str(raw).ok()?;
    ["api_key", "apiKey", "key", "token"]
        .iter()
        .filter_map(|field| parsed.get(*field).and_then(JsonValue::as_str))
        .find(|secret| !secret.trim().is_empty())
        .map(|secret| secret.trim().to_string())
}

/// Keep the last four characters visible.
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

/// API key as exposed by listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeySummary {
    pub id: Uuid,
    pub service: Service,
    pub masked_key: String,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Secret value accepted by the settings endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiKeySecret {
    Plain(String),
    Structured(serde_json::Map<String, JsonValue>),
}

impl ApiKeySecret {
    /// Representation persisted in `api_keys.api_key`.
    pub fn to_stored(&self) -> String {
        match self {
            ApiKeySecret::Plain(s) => s.trim().to_string(),
            ApiKeySecret::Structured(map) => JsonValue::Object(map.clone()).to_string(),
        }
    }
}

/// Insert-or-replace the key of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertApiKeyRequest {
    pub service: Service,
    pub secret: ApiKeySecret,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl UpsertApiKeyRequest {
    pub fn validate(&self) -> Result<()> {
        let stored = self.secret.to_stored();
        if stored.is_empty() {
            return Err(Error::Validation("api key must not be empty".into()));
        }
        if let ApiKeySecret::Structured(_) = self.secret {
            if structured_secret(&stored).is_none() {
                return Err(Error::Validation(
                    "structured api key needs an api_key, key or token field".into(),
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// ENTITIES
// =============================================================================

/// Company row owned by the CRUD application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub id: Uuid,
    pub name: String,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub employee_count_min: Option<i32>,
    pub employee_count_max: Option<i32>,
    pub annual_revenue_min: Option<i64>,
    pub annual_revenue_max: Option<i64>,
    pub founded_year: Option<i32>,
    pub linkedin_url: Option<String>,
    pub twitter_url: Option<String>,
    pub description: Option<String>,
    pub headquarters_city: Option<String>,
    pub headquarters_state: Option<String>,
    pub headquarters_country: Option<String>,
    pub tech_stack: Option<JsonValue>,
    pub last_enrichment_date: Option<DateTime<Utc>>,
}

impl CompanyRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    pub fn with_linkedin_url(mut self, url: impl Into<String>) -> Self {
        self.linkedin_url = Some(url.into());
        self
    }

    /// Merge a provider patch; absent fields keep their current value.
    pub fn apply(&mut self, patch: &CompanyPatch, at: DateTime<Utc>) {
        if let Some(name) = patch.name.as_ref().filter(|n| !n.is_empty()) {
            self.name = name.clone();
        }
        merge(&mut self.industry, &patch.industry);
        merge(&mut self.employee_count_min, &patch.employee_count_min);
        merge(&mut self.employee_count_max, &patch.employee_count_max);
        merge(&mut self.annual_revenue_min, &patch.annual_revenue_min);
        merge(&mut self.annual_revenue_max, &patch.annual_revenue_max);
        merge(&mut self.founded_year, &patch.founded_year);
        merge(&mut self.linkedin_url, &patch.linkedin_url);
        merge(&mut self.twitter_url, &patch.twitter_url);
        merge(&mut self.description, &patch.description);
        merge(&mut self.headquarters_city, &patch.headquarters_city);
        merge(&mut self.headquarters_state, &patch.headquarters_state);
        merge(&mut self.headquarters_country, &patch.headquarters_country);
        merge(&mut self.tech_stack, &patch.tech_stack);
        self.last_enrichment_date = Some(at);
    }
}

/// Contact row owned by the CRUD application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub department: Option<String>,
    pub linkedin_url: Option<String>,
    pub twitter_url: Option<String>,
    pub is_verified: bool,
    pub verification_date: Option<DateTime<Utc>>,
    pub verification_method: Option<String>,
    pub last_enrichment_date: Option<DateTime<Utc>>,
}

impl ContactRecord {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            email: Some(normalize_email(&email.into())),
            ..Default::default()
        }
    }

    pub fn with_company(mut self, company_id: Uuid) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn with_linkedin_url(mut self, url: impl Into<String>) -> Self {
        self.linkedin_url = Some(url.into());
        self
    }

    /// Merge a provider patch; absent fields keep their current value.
    pub fn apply(&mut self, patch: &ContactPatch, at: DateTime<Utc>) {
        merge(&mut self.first_name, &patch.first_name);
        merge(&mut self.last_name, &patch.last_name);
        merge(&mut self.phone, &patch.phone);
        merge(&mut self.title, &patch.title);
        merge(&mut self.department, &patch.department);
        merge(&mut self.linkedin_url, &patch.linkedin_url);
        merge(&mut self.twitter_url, &patch.twitter_url);
        self.last_enrichment_date = Some(at);
    }

    /// Merge an upserted contact, marking it verified by `service`.
    pub fn apply_upsert(&mut self, upsert: &ContactUpsert, service: Service, at: DateTime<Utc>) {
        if self.company_id.is_none() {
            self.company_id = upsert.company_id;
        }
        self.apply(&upsert.fields, at);
        self.is_verified = true;
        self.verification_date = Some(at);
        self.verification_method = Some(service.as_str().to_string());
    }
}

fn merge<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if let Some(v) = value {
        *target = Some(v.clone());
    }
}

/// Lowercased, trimmed email used as the contact upsert key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Identifying fields a provider needs to look an entity up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityLookup {
    pub entity_type: Option<EntityType>,
    pub entity_id: Uuid,
    pub name: Option<String>,
    pub website: Option<String>,
    pub linkedin_url: Option<String>,
    pub email: Option<String>,
    /// Company the contact belongs to (contacts only).
    pub company_id: Option<Uuid>,
}

impl EntityLookup {
    pub fn for_company(company: &CompanyRecord) -> Self {
        Self {
            entity_type: Some(EntityType::Company),
            entity_id: company.id,
            name: Some(company.name.clone()),
            website: company.website.clone(),
            linkedin_url: company.linkedin_url.clone(),
            email: None,
            company_id: None,
        }
    }

    pub fn for_contact(contact: &ContactRecord) -> Self {
        let name = match (&contact.first_name, &contact.last_name) {
            (Some(f), Some(l)) => Some(format!("{f} {l}")),
            (Some(f), None) => Some(f.clone()),
            (None, Some(l)) => Some(l.clone()),
            (None, None) => None,
        };
        Self {
            entity_type: Some(EntityType::Contact),
            entity_id: contact.id,
            name,
            website: None,
            linkedin_url: contact.linkedin_url.clone(),
            email: contact.email.clone(),
            company_id: contact.company_id,
        }
    }

    pub fn is_company(&self) -> bool {
        self.entity_type == Some(EntityType::Company)
    }

    /// Bare host of the website (`https://www.acme.io/about` → `acme.io`).
    pub fn domain(&self) -> Option<String> {
        let website = self.website.as_deref()?.trim();
        if website.is_empty() {
            return None;
        }
        let with_scheme = if website.contains("://") {
            website.to_string()
        } else {
            format!("https://{website}")
        };
        let url = reqwest::Url::parse(&with_scheme).ok()?;
        let host = url.host_str()?.to_lowercase();
        Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
    }
}

// =============================================================================
// ENRICHMENT PAYLOADS
// =============================================================================

/// Company fields a provider may fill in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyPatch {
    pub name: Option<String>,
    pub industry: Option<String>,
    pub employee_count_min: Option<i32>,
    pub employee_count_max: Option<i32>,
    pub annual_revenue_min: Option<i64>,
    pub annual_revenue_max: Option<i64>,
    pub founded_year: Option<i32>,
    pub linkedin_url: Option<String>,
    pub twitter_url: Option<String>,
    pub description: Option<String>,
    pub headquarters_city: Option<String>,
    pub headquarters_state: Option<String>,
    pub headquarters_country: Option<String>,
    pub tech_stack: Option<JsonValue>,
}

/// Contact fields a provider may fill in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub department: Option<String>,
    pub linkedin_url: Option<String>,
    pub twitter_url: Option<String>,
}

/// Contact discovered by a provider, keyed by email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactUpsert {
    pub email: String,
    pub company_id: Option<Uuid>,
    pub fields: ContactPatch,
}

/// One technology detected on a website.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technology {
    pub name: String,
    pub category: Option<String>,
    pub first_detected: Option<DateTime<Utc>>,
    pub last_detected: Option<DateTime<Utc>>,
}

/// Normalized provider output, applied to the store as one unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentPayload {
    pub company: Option<CompanyPatch>,
    pub contact: Option<ContactPatch>,
    pub contacts: Vec<ContactUpsert>,
}

impl EnrichmentPayload {
    /// Drop contacts without a usable email and collapse duplicates.
    ///
    /// Later entries for the same email win.
    pub fn dedup_contacts(mut self) -> Self {
        let mut out: Vec<ContactUpsert> = Vec::with_capacity(self.contacts.len());
        for mut contact in self.contacts.drain(..) {
            contact.email = normalize_email(&contact.email);
            if !contact.email.contains('@') {
                continue;
            }
            match out.iter_mut().find(|c| c.email == contact.email) {
                Some(existing) => *existing = contact,
                None => out.push(contact),
            }
        }
        self.contacts = out;
        self
    }
}

/// Summary of what an apply wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub entity_updated: bool,
    pub contacts_inserted: usize,
    pub contacts_updated: usize,
}

/// Dashboard counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub companies: i64,
    pub contacts: i64,
    pub last_enrichment_date: Option<DateTime<Utc>>,
}
