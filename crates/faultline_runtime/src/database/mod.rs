// Database module for the Faultline runtime.
// SQLite-backed job, integration, and review persistence.

use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError, FaultlineResult};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub mod integrations;
pub mod jobs;
pub mod migrations;
pub mod reviews;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://faultline.db?mode=rwc".to_string(),
            max_connections: 10,
        }
    }
}

/// Owns the connection pool. One pool per process; every job's processing
/// path acquires its own connections through the ops structs.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect and run migrations.
    pub async fn connect(config: &DatabaseConfig) -> FaultlineResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| {
                FaultlineError::new(
                    ErrorCode::DatabaseError,
                    ErrorCategory::System,
                    ErrorSeverity::Critical,
                    &format!("Failed to connect to database: {}", e),
                )
            })?;

        migrations::run_migrations(&pool).await?;
        tracing::info!("database initialized");
        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> FaultlineResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| FaultlineError::database_error(&format!("in-memory connect: {}", e)))?;
        migrations::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
