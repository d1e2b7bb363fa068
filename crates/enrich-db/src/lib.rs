//! # enrich-db
//!
//! PostgreSQL store for the enrichment queue.
//!
//! This crate provides:
//! - Connection pool management
//! - The job queue with an atomic `FOR UPDATE SKIP LOCKED` claim
//! - Provider credential storage
//! - Company and contact enrichment writes, applied per job in one transaction
//! - An in-memory store with the same semantics, for tests and embedding
//!
//! ## Example
//!
//! ```rust,ignore
//! use enrich_db::{Database, JobRepository};
//!
//! let db = Database::connect("postgres://localhost/enrich").await?;
//! db.migrate().await?;
//! if let Some(job) = db.jobs.claim_next("worker-1").await? {
//!     db.jobs.mark_completed(job.id, "worker-1").await?;
//! }
//! ```

pub mod api_keys;
pub mod entities;
pub mod jobs;
pub mod memory;
pub mod pool;

// Compiled outside cfg(test) so integration tests (in tests/) can use the fixtures.
#[cfg(feature = "migrations")]
pub mod test_fixtures;

// Re-export core types
pub use enrich_core::*;

pub use api_keys::PgApiKeyRepository;
pub use entities::PgEntityRepository;
pub use jobs::PgJobRepository;
pub use memory::InMemoryStore;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Enrichment job queue.
    pub jobs: PgJobRepository,
    /// Provider credentials.
    pub api_keys: PgApiKeyRepository,
    /// Companies and contacts.
    pub entities: PgEntityRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobRepository::new(pool.clone()),
            api_keys: PgApiKeyRepository::new(pool.clone()),
            entities: PgEntityRepository::new(pool.clone()),
            pool,
        }
    }

    /// Use `policy` for failure decisions.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.jobs = PgJobRepository::with_policy(self.pool.clone(), policy);
        self
    }

    /// Connect to the database at the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            jobs: self.jobs.clone(),
            api_keys: self.api_keys.clone(),
            entities: self.entities.clone(),
        }
    }
}
