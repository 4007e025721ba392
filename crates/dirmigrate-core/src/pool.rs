//! Database connection pool management.

use crate::config::{DatabaseType, MigrationConfig};
use crate::error::{MigrationError, Result};
use sqlx::{any::AnyPoolOptions, AnyPool};
use tracing::debug;

/// Database connection pool shared by the record store and the SQL executor.
#[derive(Clone)]
pub struct DatabasePool {
    pool: AnyPool,
    database_type: DatabaseType,
}

impl DatabasePool {
    /// Connect using the database settings of a migration configuration.
    pub async fn connect(config: &MigrationConfig) -> Result<Self> {
        config.validate_database()?;
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| MigrationError::Connection(e.to_string()))?;

        debug!(database_type = %config.database_type, "Database pool connected");

        Ok(Self {
            pool,
            database_type: config.database_type,
        })
    }

    /// Get a reference to the underlying pool.
    #[must_use]
    pub fn inner(&self) -> &AnyPool {
        &self.pool
    }

    /// Get the database type.
    #[must_use]
    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Test the connection.
    pub async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::Connection(e.to_string()))?;

        Ok(())
    }
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("database_type", &self.database_type)
            .field("size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .finish()
    }
}
