// Per-job preprocessing, performed once and cached onto the execution
// context for the duration of the job. GitHub reachability is the one hard
// dependency; the metadata fetches degrade independently.

use crate::cache::TtlCache;
use crate::database::integrations::{IntegrationOps, ServiceMappingOps};
use crate::database::Database;
use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError, FaultlineResult};
use crate::tools::code::CodeHost;
use crate::types::HealthStatus;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Environment/deployment and team-ownership lookups. External collaborator;
/// both calls are soft dependencies.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn environment(&self, workspace_id: &str) -> FaultlineResult<HashMap<String, String>>;
    async fn ownership(&self, workspace_id: &str) -> FaultlineResult<HashMap<String, String>>;
}

/// HTTP metadata provider hitting the deployment-metadata service.
pub struct HttpMetadataProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetadataProvider {
    pub fn new(base_url: String) -> FaultlineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| {
                FaultlineError::new(
                    ErrorCode::NetworkError,
                    ErrorCategory::Network,
                    ErrorSeverity::Critical,
                    &format!("Failed to create HTTP client: {}", e),
                )
            })?;
        Ok(Self { client, base_url })
    }

    async fn fetch(&self, path: &str, workspace_id: &str) -> FaultlineResult<HashMap<String, String>> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(&[("workspace_id", workspace_id)])
            .send()
            .await
            .map_err(|e| {
                FaultlineError::new(
                    ErrorCode::UpstreamServiceError,
                    ErrorCategory::Network,
                    ErrorSeverity::Medium,
                    &format!("metadata service unreachable: {}", e),
                )
            })?;
        response.json().await.map_err(|e| {
            FaultlineError::new(
                ErrorCode::DeserializationError,
                ErrorCategory::Network,
                ErrorSeverity::Medium,
                &format!("bad metadata payload: {}", e),
            )
        })
    }
}

#[async_trait]
impl MetadataProvider for HttpMetadataProvider {
    async fn environment(&self, workspace_id: &str) -> FaultlineResult<HashMap<String, String>> {
        self.fetch("/metadata/environment", workspace_id).await
    }

    async fn ownership(&self, workspace_id: &str) -> FaultlineResult<HashMap<String, String>> {
        self.fetch("/metadata/ownership", workspace_id).await
    }
}

/// Resolved preprocessing output merged onto the execution context.
#[derive(Debug, Default)]
pub struct PreprocessOutcome {
    pub service_mapping: HashMap<String, Vec<String>>,
    pub environment: HashMap<String, String>,
    pub ownership: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Fixed batch size for concurrent repository scanning.
    pub scan_concurrency: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { scan_concurrency: 4 }
    }
}

pub struct Preprocessor {
    db: Database,
    code_host: Arc<dyn CodeHost>,
    metadata: Arc<dyn MetadataProvider>,
    service_cache: TtlCache<String, HashMap<String, Vec<String>>>,
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(
        db: Database,
        code_host: Arc<dyn CodeHost>,
        metadata: Arc<dyn MetadataProvider>,
        config: PreprocessConfig,
    ) -> Self {
        Self {
            db,
            code_host,
            metadata,
            service_cache: TtlCache::new(Default::default()),
            config,
        }
    }

    /// Verify the GitHub hard dependency and assemble soft metadata.
    ///
    /// The reachability probe persists its result so the capability
    /// resolver's view stays fresh for future invocations.
    pub async fn prepare(&self, workspace_id: &str) -> FaultlineResult<PreprocessOutcome> {
        let github = IntegrationOps::get_by_provider(self.db.pool(), workspace_id, "github")
            .await?
            .ok_or_else(|| {
                FaultlineError::new(
                    ErrorCode::MissingIntegration,
                    ErrorCategory::Configuration,
                    ErrorSeverity::High,
                    "GitHub integration is not configured for this workspace",
                )
            })?;

        match self.code_host.ping(workspace_id).await {
            Ok(()) => {
                IntegrationOps::update_health(self.db.pool(), github.id, HealthStatus::Healthy)
                    .await?;
            }
            Err(e) => {
                IntegrationOps::update_health(self.db.pool(), github.id, HealthStatus::Failed)
                    .await?;
                return Err(FaultlineError::new(
                    ErrorCode::MissingCredentials,
                    ErrorCategory::Configuration,
                    ErrorSeverity::High,
                    &format!("GitHub integration is unreachable: {}", e),
                ));
            }
        }

        let mut outcome = PreprocessOutcome {
            service_mapping: self.service_mapping(workspace_id).await,
            ..Default::default()
        };

        // Soft dependencies: a failure degrades, never aborts
        match self.metadata.environment(workspace_id).await {
            Ok(environment) => outcome.environment = environment,
            Err(e) => warn!(error = %e, "environment metadata unavailable"),
        }
        match self.metadata.ownership(workspace_id).await {
            Ok(ownership) => outcome.ownership = ownership,
            Err(e) => warn!(error = %e, "ownership metadata unavailable"),
        }

        Ok(outcome)
    }

    /// Curated mapping when present, otherwise discovery by scanning
    /// repositories in fixed-size concurrent batches.
    async fn service_mapping(&self, workspace_id: &str) -> HashMap<String, Vec<String>> {
        if let Some(cached) = self.service_cache.get(&workspace_id.to_string()).await {
            return cached;
        }

        let mut mapping = ServiceMappingOps::for_workspace(self.db.pool(), workspace_id)
            .await
            .unwrap_or_default();

        if mapping.is_empty() {
            mapping = self.discover_services(workspace_id).await;
            for (service, repos) in &mapping {
                if let Err(e) =
                    ServiceMappingOps::upsert(self.db.pool(), workspace_id, service, repos).await
                {
                    warn!(error = %e, service, "failed to persist discovered mapping");
                }
            }
        }

        self.service_cache
            .insert(workspace_id.to_string(), mapping.clone())
            .await;
        mapping
    }

    async fn discover_services(&self, workspace_id: &str) -> HashMap<String, Vec<String>> {
        let repositories = match self.code_host.list_repositories(workspace_id).await {
            Ok(repositories) => repositories,
            Err(e) => {
                warn!(error = %e, "repository listing failed, no discovery");
                return HashMap::new();
            }
        };

        let mut mapping: HashMap<String, Vec<String>> = HashMap::new();
        for batch in repositories.chunks(self.config.scan_concurrency.max(1)) {
            let scans = batch
                .iter()
                .map(|repo| self.scan_repository(workspace_id, repo.clone()));
            for result in join_all(scans).await.into_iter().flatten() {
                mapping.entry(result.0).or_default().push(result.1);
            }
        }
        debug!(services = mapping.len(), "service discovery finished");
        mapping
    }

    /// Look for a service manifest at the repository root.
    async fn scan_repository(&self, workspace_id: &str, repo: String) -> Option<(String, String)> {
        let content = self
            .code_host
            .read_file(workspace_id, &repo, "service.json")
            .await
            .ok()
            .filter(|c| !c.is_empty())?;
        let manifest: serde_json::Value = serde_json::from_str(&content).ok()?;
        let name = manifest.get("name")?.as_str()?.to_string();
        Some((name, repo))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::StubMetadata;
    use super::*;
    use crate::tools::code::test_support::StubCodeHost;
    use crate::types::Integration;
    use uuid::Uuid;

    async fn seed_github(db: &Database, health: Option<HealthStatus>) -> Uuid {
        let integration = Integration {
            id: Uuid::new_v4(),
            workspace_id: "ws-1".to_string(),
            provider: "github".to_string(),
            enabled: true,
            health_status: health,
            last_checked_at: None,
        };
        IntegrationOps::insert(db.pool(), &integration).await.unwrap();
        integration.id
    }

    #[tokio::test]
    async fn missing_github_is_a_hard_failure() {
        let db = Database::in_memory().await.unwrap();
        let preprocessor = Preprocessor::new(
            db,
            Arc::new(StubCodeHost::reachable(vec![])),
            Arc::new(StubMetadata { fail: false }),
            PreprocessConfig::default(),
        );

        let err = preprocessor.prepare("ws-1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingIntegration);
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn unreachable_github_fails_and_persists_health() {
        let db = Database::in_memory().await.unwrap();
        let id = seed_github(&db, Some(HealthStatus::Healthy)).await;
        let preprocessor = Preprocessor::new(
            db.clone(),
            Arc::new(StubCodeHost::unreachable()),
            Arc::new(StubMetadata { fail: false }),
            PreprocessConfig::default(),
        );

        let err = preprocessor.prepare("ws-1").await.unwrap_err();
        assert!(err.is_configuration());

        let reloaded = IntegrationOps::get_by_provider(db.pool(), "ws-1", "github")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.health_status, Some(HealthStatus::Failed));
        let _ = id;
    }

    #[tokio::test]
    async fn soft_metadata_failures_degrade_not_abort() {
        let db = Database::in_memory().await.unwrap();
        seed_github(&db, None).await;
        let preprocessor = Preprocessor::new(
            db,
            Arc::new(StubCodeHost::reachable(vec![])),
            Arc::new(StubMetadata { fail: true }),
            PreprocessConfig::default(),
        );

        let outcome = preprocessor.prepare("ws-1").await.unwrap();
        assert!(outcome.environment.is_empty());
        assert!(outcome.ownership.is_empty());
    }

    #[tokio::test]
    async fn services_are_discovered_from_repository_manifests() {
        let db = Database::in_memory().await.unwrap();
        seed_github(&db, Some(HealthStatus::Healthy)).await;

        let host = StubCodeHost::reachable(vec!["org/checkout-api", "org/billing", "org/docs"]);
        host.files.lock().unwrap().insert(
            "org/checkout-api/service.json".to_string(),
            r#"{"name": "checkout"}"#.to_string(),
        );
        host.files.lock().unwrap().insert(
            "org/billing/service.json".to_string(),
            r#"{"name": "billing"}"#.to_string(),
        );

        let preprocessor = Preprocessor::new(
            db.clone(),
            Arc::new(host),
            Arc::new(StubMetadata { fail: false }),
            PreprocessConfig { scan_concurrency: 2 },
        );

        let outcome = preprocessor.prepare("ws-1").await.unwrap();
        assert_eq!(outcome.service_mapping["checkout"], vec!["org/checkout-api"]);
        assert_eq!(outcome.service_mapping["billing"], vec!["org/billing"]);
        assert!(!outcome.service_mapping.contains_key("docs"));

        // Discovery was persisted for the next job
        let stored = ServiceMappingOps::for_workspace(db.pool(), "ws-1").await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn environment_metadata_is_attached_when_available() {
        let db = Database::in_memory().await.unwrap();
        seed_github(&db, Some(HealthStatus::Healthy)).await;
        let preprocessor = Preprocessor::new(
            db,
            Arc::new(StubCodeHost::reachable(vec![])),
            Arc::new(StubMetadata { fail: false }),
            PreprocessConfig::default(),
        );

        let outcome = preprocessor.prepare("ws-1").await.unwrap();
        assert_eq!(outcome.environment["env"], "production");
        assert_eq!(outcome.ownership["checkout"], "team-payments");
    }
}
