// Schema migrations. Versioned statements applied in order at startup.

use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError, FaultlineResult};
use sqlx::SqlitePool;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Clone)]
struct Migration {
    version: i32,
    description: &'static str,
    sql: &'static str,
}

/// Run all migrations not yet applied.
pub async fn run_migrations(pool: &SqlitePool) -> FaultlineResult<()> {
    create_migrations_table(pool).await?;

    let current_version = get_current_version(pool).await?;
    for migration in migrations() {
        if migration.version > current_version {
            apply_migration(pool, &migration).await?;
        }
    }

    Ok(())
}

fn migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "initial schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                source TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'QUEUED',
                requested_context TEXT NOT NULL,
                report TEXT,
                error_message TEXT,
                error_type TEXT,
                backoff_until TEXT,
                started_at TEXT,
                finished_at TEXT,
                created_at TEXT NOT NULL,
                metrics TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_workspace ON jobs(workspace_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

            CREATE TABLE IF NOT EXISTS integrations (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                health_status TEXT,
                last_checked_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_integrations_workspace ON integrations(workspace_id);

            CREATE TABLE IF NOT EXISTS service_mappings (
                workspace_id TEXT NOT NULL,
                service_name TEXT NOT NULL,
                repositories TEXT NOT NULL,
                PRIMARY KEY (workspace_id, service_name)
            );

            CREATE TABLE IF NOT EXISTS review_schedules (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                service_name TEXT NOT NULL,
                interval_hours INTEGER NOT NULL,
                last_run_at TEXT
            );

            CREATE TABLE IF NOT EXISTS service_reviews (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                service_name TEXT NOT NULL,
                report TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
        "#,
    }]
}

async fn create_migrations_table(pool: &SqlitePool) -> FaultlineResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )
    "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        FaultlineError::new(
            ErrorCode::DatabaseError,
            ErrorCategory::System,
            ErrorSeverity::Critical,
            &format!("Failed to create migrations table: {}", e),
        )
    })?;
    Ok(())
}

async fn get_current_version(pool: &SqlitePool) -> FaultlineResult<i32> {
    let row: (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_one(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to read schema version: {}", e)))?;
    Ok(row.0.unwrap_or(0))
}

async fn apply_migration(pool: &SqlitePool, migration: &Migration) -> FaultlineResult<()> {
    tracing::info!(version = migration.version, description = migration.description, "applying migration");

    // SQLite executes one statement at a time through sqlx
    for statement in migration.sql.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await.map_err(|e| {
            FaultlineError::new(
                ErrorCode::DatabaseError,
                ErrorCategory::System,
                ErrorSeverity::Critical,
                &format!("Migration {} failed: {}", migration.version, e),
            )
        })?;
    }

    sqlx::query("INSERT INTO _migrations (version, description, applied_at) VALUES (?, ?, ?)")
        .bind(migration.version)
        .bind(migration.description)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to record migration: {}", e)))?;

    Ok(())
}
