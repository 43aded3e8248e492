// Integration persistence: what the capability resolver reads, and where
// the worker's health probes write their side effects.

use crate::errors::{FaultlineError, FaultlineResult};
use crate::types::{HealthStatus, Integration};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

type IntegrationRow = (String, String, String, i64, Option<String>, Option<String>);

pub struct IntegrationOps;

impl IntegrationOps {
    /// All enabled integrations for a workspace in one query.
    pub async fn for_workspace(
        pool: &SqlitePool,
        workspace_id: &str,
    ) -> FaultlineResult<Vec<Integration>> {
        let rows: Vec<IntegrationRow> = sqlx::query_as(
            r#"
            SELECT id, workspace_id, provider, enabled, health_status, last_checked_at
            FROM integrations
            WHERE workspace_id = ? AND enabled = 1
        "#,
        )
        .bind(workspace_id)
        .fetch_all(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to list integrations: {}", e)))?;

        rows.into_iter().map(Self::from_row).collect()
    }

    pub async fn get_by_provider(
        pool: &SqlitePool,
        workspace_id: &str,
        provider: &str,
    ) -> FaultlineResult<Option<Integration>> {
        let row: Option<IntegrationRow> = sqlx::query_as(
            r#"
            SELECT id, workspace_id, provider, enabled, health_status, last_checked_at
            FROM integrations
            WHERE workspace_id = ? AND provider = ? AND enabled = 1
        "#,
        )
        .bind(workspace_id)
        .bind(provider)
        .fetch_optional(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to get integration: {}", e)))?;

        row.map(Self::from_row).transpose()
    }

    /// Persist a probe result so future capability resolutions see it.
    pub async fn update_health(
        pool: &SqlitePool,
        id: Uuid,
        health_status: HealthStatus,
    ) -> FaultlineResult<()> {
        sqlx::query("UPDATE integrations SET health_status = ?, last_checked_at = ? WHERE id = ?")
            .bind(health_status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(pool)
            .await
            .map_err(|e| {
                FaultlineError::database_error(&format!("Failed to update integration health: {}", e))
            })?;
        Ok(())
    }

    /// Insert an integration row (provisioning and tests).
    pub async fn insert(pool: &SqlitePool, integration: &Integration) -> FaultlineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO integrations (id, workspace_id, provider, enabled, health_status, last_checked_at)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(integration.id.to_string())
        .bind(&integration.workspace_id)
        .bind(&integration.provider)
        .bind(integration.enabled as i64)
        .bind(integration.health_status.map(|h| h.as_str()))
        .bind(integration.last_checked_at.map(|t| t.to_rfc3339()))
        .execute(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to insert integration: {}", e)))?;
        Ok(())
    }

    fn from_row(row: IntegrationRow) -> FaultlineResult<Integration> {
        Ok(Integration {
            id: Uuid::parse_str(&row.0)
                .map_err(|e| FaultlineError::database_error(&format!("Bad integration id: {}", e)))?,
            workspace_id: row.1,
            provider: row.2,
            enabled: row.3 != 0,
            health_status: row.4.as_deref().and_then(HealthStatus::parse),
            last_checked_at: row
                .5
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc)),
        })
    }
}

/// Service -> repository mapping, curated by the user.
pub struct ServiceMappingOps;

impl ServiceMappingOps {
    pub async fn for_workspace(
        pool: &SqlitePool,
        workspace_id: &str,
    ) -> FaultlineResult<std::collections::HashMap<String, Vec<String>>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT service_name, repositories FROM service_mappings WHERE workspace_id = ?",
        )
        .bind(workspace_id)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            FaultlineError::database_error(&format!("Failed to load service mappings: {}", e))
        })?;

        let mut mapping = std::collections::HashMap::new();
        for (service, repos_json) in rows {
            let repos: Vec<String> = serde_json::from_str(&repos_json).unwrap_or_default();
            mapping.insert(service, repos);
        }
        Ok(mapping)
    }

    pub async fn upsert(
        pool: &SqlitePool,
        workspace_id: &str,
        service_name: &str,
        repositories: &[String],
    ) -> FaultlineResult<()> {
        let repos_json = serde_json::to_string(repositories)?;
        sqlx::query(
            r#"
            INSERT INTO service_mappings (workspace_id, service_name, repositories)
            VALUES (?, ?, ?)
            ON CONFLICT (workspace_id, service_name) DO UPDATE SET repositories = excluded.repositories
        "#,
        )
        .bind(workspace_id)
        .bind(service_name)
        .bind(repos_json)
        .execute(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to upsert mapping: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn integration(workspace: &str, provider: &str, health: Option<HealthStatus>) -> Integration {
        Integration {
            id: Uuid::new_v4(),
            workspace_id: workspace.to_string(),
            provider: provider.to_string(),
            enabled: true,
            health_status: health,
            last_checked_at: None,
        }
    }

    #[tokio::test]
    async fn health_update_is_visible_on_next_read() {
        let db = Database::in_memory().await.unwrap();
        let row = integration("ws-1", "github", None);
        IntegrationOps::insert(db.pool(), &row).await.unwrap();

        IntegrationOps::update_health(db.pool(), row.id, HealthStatus::Healthy)
            .await
            .unwrap();

        let reloaded = IntegrationOps::get_by_provider(db.pool(), "ws-1", "github")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.health_status, Some(HealthStatus::Healthy));
        assert!(reloaded.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn service_mapping_round_trip() {
        let db = Database::in_memory().await.unwrap();
        ServiceMappingOps::upsert(
            db.pool(),
            "ws-1",
            "checkout",
            &["org/checkout-api".to_string(), "org/checkout-web".to_string()],
        )
        .await
        .unwrap();

        let mapping = ServiceMappingOps::for_workspace(db.pool(), "ws-1").await.unwrap();
        assert_eq!(mapping["checkout"].len(), 2);
    }
}
