//! Company and contact access for the enrichment pipeline.
//!
//! The CRUD application owns these rows; this repository reads identifying
//! fields and writes enrichment results back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Pool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use enrich_core::{
    ApplyReport, CompanyPatch, CompanyRecord, ContactPatch, ContactRecord, ContactUpsert,
    DashboardStats, EnrichmentPayload, EntityLookup, EntityRepository, EntityType, Error, Result,
    Service,
};

const COMPANY_COLUMNS: &str = "id, name, website, industry, employee_count_min, \
     employee_count_max, annual_revenue_min, annual_revenue_max, founded_year, linkedin_url, \
     twitter_url, description, headquarters_city, headquarters_state, headquarters_country, \
     tech_stack, last_enrichment_date";

const CONTACT_COLUMNS: &str = "id, company_id, first_name, last_name, email, phone, title, \
     department, linkedin_url, twitter_url, is_verified, verification_date, verification_method, \
     last_enrichment_date";

/// PostgreSQL implementation of EntityRepository.
#[derive(Clone)]
pub struct PgEntityRepository {
    pool: Pool<Postgres>,
}

impl PgEntityRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_company_row(row: &PgRow) -> Result<CompanyRecord> {
        Ok(CompanyRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            website: row.try_get("website")?,
            industry: row.try_get("industry")?,
            employee_count_min: row.try_get("employee_count_min")?,
            employee_count_max: row.try_get("employee_count_max")?,
            annual_revenue_min: row.try_get("annual_revenue_min")?,
            annual_revenue_max: row.try_get("annual_revenue_max")?,
            founded_year: row.try_get("founded_year")?,
            linkedin_url: row.try_get("linkedin_url")?,
            twitter_url: row.try_get("twitter_url")?,
            description: row.try_get("description")?,
            headquarters_city: row.try_get("headquarters_city")?,
            headquarters_state: row.try_get("headquarters_state")?,
            headquarters_country: row.try_get("headquarters_country")?,
            tech_stack: row.try_get("tech_stack")?,
            last_enrichment_date: row.try_get("last_enrichment_date")?,
        })
    }

    fn parse_contact_row(row: &PgRow) -> Result<ContactRecord> {
        Ok(ContactRecord {
            id: row.try_get("id")?,
            company_id: row.try_get("company_id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            title: row.try_get("title")?,
            department: row.try_get("department")?,
            linkedin_url: row.try_get("linkedin_url")?,
            twitter_url: row.try_get("twitter_url")?,
            is_verified: row.try_get("is_verified")?,
            verification_date: row.try_get("verification_date")?,
            verification_method: row.try_get("verification_method")?,
            last_enrichment_date: row.try_get("last_enrichment_date")?,
        })
    }

    /// Insert a company row. Used by fixtures and imports.
    pub async fn insert_company(&self, company: &CompanyRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO companies (id, name, website, linkedin_url, industry)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(company.id)
        .bind(&company.name)
        .bind(&company.website)
        .bind(&company.linkedin_url)
        .bind(&company.industry)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Insert a contact row. Used by fixtures and imports.
    pub async fn insert_contact(&self, contact: &ContactRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO contacts (id, company_id, first_name, last_name, email, linkedin_url)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(contact.id)
        .bind(contact.company_id)
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(&contact.email)
        .bind(&contact.linkedin_url)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn update_company(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        patch: &CompanyPatch,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE companies SET
                 name = COALESCE(NULLIF($2, ''), name),
                 industry = COALESCE($3, industry),
                 employee_count_min = COALESCE($4, employee_count_min),
                 employee_count_max = COALESCE($5, employee_count_max),
                 annual_revenue_min = COALESCE($6, annual_revenue_min),
                 annual_revenue_max = COALESCE($7, annual_revenue_max),
                 founded_year = COALESCE($8, founded_year),
                 linkedin_url = COALESCE($9, linkedin_url),
                 twitter_url = COALESCE($10, twitter_url),
                 description = COALESCE($11, description),
                 headquarters_city = COALESCE($12, headquarters_city),
                 headquarters_state = COALESCE($13, headquarters_state),
                 headquarters_country = COALESCE($14, headquarters_country),
                 tech_stack = COALESCE($15, tech_stack),
                 last_enrichment_date = $16,
                 updated_at = $16
             WHERE id = $1",
        )
        .bind(id)
        .bind(&patch.name)
        .bind(&patch.industry)
        .bind(patch.employee_count_min)
        .bind(patch.employee_count_max)
        .bind(patch.annual_revenue_min)
        .bind(patch.annual_revenue_max)
        .bind(patch.founded_year)
        .bind(&patch.linkedin_url)
        .bind(&patch.twitter_url)
        .bind(&patch.description)
        .bind(&patch.headquarters_city)
        .bind(&patch.headquarters_state)
        .bind(&patch.headquarters_country)
        .bind(&patch.tech_stack)
        .bind(at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_contact(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        patch: &ContactPatch,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE contacts SET
                 first_name = COALESCE($2, first_name),
                 last_name = COALESCE($3, last_name),
                 phone = COALESCE($4, phone),
                 title = COALESCE($5, title),
                 department = COALESCE($6, department),
                 linkedin_url = COALESCE($7, linkedin_url),
                 twitter_url = COALESCE($8, twitter_url),
                 last_enrichment_date = $9,
                 updated_at = $9
             WHERE id = $1",
        )
        .bind(id)
        .bind(&patch.first_name)
        .bind(&patch.last_name)
        .bind(&patch.phone)
        .bind(&patch.title)
        .bind(&patch.department)
        .bind(&patch.linkedin_url)
        .bind(&patch.twitter_url)
        .bind(at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert-or-merge one contact keyed by email. Returns true on insert.
    async fn upsert_contact(
        tx: &mut Transaction<'_, Postgres>,
        upsert: &ContactUpsert,
        service: Service,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let f = &upsert.fields;
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO contacts
                 (id, company_id, email, first_name, last_name, phone, title, department,
                  linkedin_url, twitter_url, is_verified, verification_date, verification_method,
                  last_enrichment_date, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, true, $11, $12, $11, $11, $11)
             ON CONFLICT (email) DO UPDATE SET
                 company_id = COALESCE(contacts.company_id, EXCLUDED.company_id),
                 first_name = COALESCE(EXCLUDED.first_name, contacts.first_name),
                 last_name = COALESCE(EXCLUDED.last_name, contacts.last_name),
                 phone = COALESCE(EXCLUDED.phone, contacts.phone),
                 title = COALESCE(EXCLUDED.title, contacts.title),
                 department = COALESCE(EXCLUDED.department, contacts.department),
                 linkedin_url = COALESCE(EXCLUDED.linkedin_url, contacts.linkedin_url),
                 twitter_url = COALESCE(EXCLUDED.twitter_url, contacts.twitter_url),
                 is_verified = true,
                 verification_date = EXCLUDED.verification_date,
                 verification_method = EXCLUDED.verification_method,
                 last_enrichment_date = EXCLUDED.last_enrichment_date,
                 updated_at = EXCLUDED.updated_at
             RETURNING (xmax = 0)",
        )
        .bind(Uuid::now_v7())
        .bind(upsert.company_id)
        .bind(&upsert.email)
        .bind(&f.first_name)
        .bind(&f.last_name)
        .bind(&f.phone)
        .bind(&f.title)
        .bind(&f.department)
        .bind(&f.linkedin_url)
        .bind(&f.twitter_url)
        .bind(at)
        .bind(service.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(inserted)
    }
}

#[async_trait]
impl EntityRepository for PgEntityRepository {
    async fn exists(&self, entity_type: EntityType, entity_id: Uuid) -> Result<bool> {
        let sql = match entity_type {
            EntityType::Company => "SELECT EXISTS(SELECT 1 FROM companies WHERE id = $1)",
            EntityType::Contact => "SELECT EXISTS(SELECT 1 FROM contacts WHERE id = $1)",
        };
        let exists: bool = sqlx::query_scalar(sql)
            .bind(entity_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(exists)
    }

    async fn lookup(&self, entity_type: EntityType, entity_id: Uuid) -> Result<EntityLookup> {
        let not_found = || Error::NotFound(format!("{entity_type} {entity_id}"));
        match entity_type {
            EntityType::Company => self
                .get_company(entity_id)
                .await?
                .map(|c| EntityLookup::for_company(&c))
                .ok_or_else(not_found),
            EntityType::Contact => self
                .get_contact(entity_id)
                .await?
                .map(|c| EntityLookup::for_contact(&c))
                .ok_or_else(not_found),
        }
    }

    async fn apply_enrichment(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        service: Service,
        payload: &EnrichmentPayload,
    ) -> Result<ApplyReport> {
        let at = Utc::now();
        let mut report = ApplyReport::default();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // The entity row is always stamped so a no-op provider result still
        // records when enrichment last ran.
        let updated = match entity_type {
            EntityType::Company => {
                let patch = payload.company.clone().unwrap_or_default();
                Self::update_company(&mut tx, entity_id, &patch, at).await?
            }
            EntityType::Contact => {
                let patch = payload.contact.clone().unwrap_or_default();
                Self::update_contact(&mut tx, entity_id, &patch, at).await?
            }
        };
        if !updated {
            return Err(Error::NotFound(format!("{entity_type} {entity_id}")));
        }
        report.entity_updated = true;

        for upsert in &payload.contacts {
            if Self::upsert_contact(&mut tx, upsert, service, at).await? {
                report.contacts_inserted += 1;
            } else {
                report.contacts_updated += 1;
            }
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "entities",
            op = "apply_enrichment",
            entity_type = %entity_type,
            entity_id = %entity_id,
            service = %service,
            contacts_inserted = report.contacts_inserted,
            contacts_updated = report.contacts_updated,
            "Applied enrichment payload"
        );
        Ok(report)
    }

    async fn get_company(&self, id: Uuid) -> Result<Option<CompanyRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_company_row).transpose()
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<ContactRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_contact_row).transpose()
    }

    async fn list_contacts_for_company(&self, company_id: Uuid) -> Result<Vec<ContactRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE company_id = $1 ORDER BY email"
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_contact_row).collect()
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM companies) AS companies,
                (SELECT COUNT(*) FROM contacts) AS contacts,
                GREATEST(
                    (SELECT MAX(last_enrichment_date) FROM companies),
                    (SELECT MAX(last_enrichment_date) FROM contacts)
                ) AS last_enrichment_date",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(DashboardStats {
            companies: row.try_get("companies")?,
            contacts: row.try_get("contacts")?,
            last_enrichment_date: row.try_get("last_enrichment_date")?,
        })
    }
}
