use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub mod incidents;
pub mod migrations;

pub use incidents::PgIncidentStore;

/// Connection pool and schema management for the incident store
pub struct DatabaseService {
    pub pool: Arc<PgPool>,
}

impl DatabaseService {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Initializing Database service");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await
            .map_err(|e| Error::StorageUnavailable(format!("Failed to connect to database: {}", e)))?;

        info!("Connected to PostgreSQL database");

        let service = Self {
            pool: Arc::new(pool),
        };

        if config.auto_migrate {
            service.run_migrations().await?;
        }

        Ok(service)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        let applied = migrations::run_migrations(&self.pool).await?;
        info!("Database migrations completed ({} applied)", applied);
        Ok(())
    }

    /// Incident store over this pool
    pub fn incident_store(&self) -> PgIncidentStore {
        PgIncidentStore::new(self.pool.clone())
    }

    pub async fn health_check(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&*self.pool).await {
            Ok(_) => true,
            Err(e) => {
                error!("Database health check failed: {}", e);
                false
            }
        }
    }
}
