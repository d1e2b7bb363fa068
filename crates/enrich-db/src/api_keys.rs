//! Provider credential repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::info;
use uuid::Uuid;

use enrich_core::{ApiKey, ApiKeyRepository, Error, Result, Service, UpsertApiKeyRequest};

const KEY_COLUMNS: &str = "id, service, api_key, is_active, last_used_at, created_at, updated_at";

/// PostgreSQL implementation of ApiKeyRepository.
#[derive(Clone)]
pub struct PgApiKeyRepository {
    pool: Pool<Postgres>,
}

impl PgApiKeyRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_key_row(row: &PgRow) -> Result<ApiKey> {
        let service: String = row.try_get("service")?;
        Ok(ApiKey {
            id: row.try_get("id")?,
            service: service.parse()?,
            api_key: row.try_get("api_key")?,
            is_active: row.try_get("is_active")?,
            last_used_at: row.try_get("last_used_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ApiKeyRepository for PgApiKeyRepository {
    async fn get_active(&self, service: Service) -> Result<Option<ApiKey>> {
        let row = sqlx::query(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE service = $1 AND is_active"
        ))
        .bind(service.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_key_row).transpose()
    }

    async fn active_services(&self) -> Result<Vec<Service>> {
        let services: Vec<String> =
            sqlx::query_scalar("SELECT service FROM api_keys WHERE is_active ORDER BY service")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;

        let mut parsed = services
            .iter()
            .map(|s| s.parse::<Service>())
            .collect::<Result<Vec<_>>>()?;
        parsed.sort();
        Ok(parsed)
    }

    async fn list(&self) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys ORDER BY service"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_key_row).collect()
    }

    async fn upsert(&self, request: UpsertApiKeyRequest) -> Result<ApiKey> {
        request.validate()?;
        let now = Utc::now();

        let row = sqlx::query(&format!(
            "INSERT INTO api_keys (id, service, api_key, is_active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)
             ON CONFLICT (service) DO UPDATE
             SET api_key = EXCLUDED.api_key, is_active = EXCLUDED.is_active,
                 updated_at = EXCLUDED.updated_at
             RETURNING {KEY_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(request.service.as_str())
        .bind(request.secret.to_stored())
        .bind(request.is_active)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "api_keys",
            op = "upsert",
            service = %request.service,
            is_active = request.is_active,
            "Stored provider key"
        );
        Self::parse_key_row(&row)
    }

    async fn set_active(&self, service: Service, active: bool) -> Result<ApiKey> {
        let row = sqlx::query(&format!(
            "UPDATE api_keys SET is_active = $2, updated_at = $3
             WHERE service = $1
             RETURNING {KEY_COLUMNS}"
        ))
        .bind(service.as_str())
        .bind(active)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("api key for {service}")))?;

        Self::parse_key_row(&row)
    }

    async fn touch(&self, service: Service) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE service = $1")
            .bind(service.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
