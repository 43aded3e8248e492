// Code search / read / repository tools backed by the workspace's code host.

use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError, FaultlineResult};
use crate::tools::{required_str, ToolHandler};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Interface consumed by the code tools and the worker's GitHub probe.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn search_code(&self, workspace_id: &str, query: &str) -> FaultlineResult<Vec<String>>;
    async fn read_file(&self, workspace_id: &str, repository: &str, path: &str) -> FaultlineResult<String>;
    async fn repository_info(&self, workspace_id: &str, repository: &str) -> FaultlineResult<String>;
    async fn list_repositories(&self, workspace_id: &str) -> FaultlineResult<Vec<String>>;
    /// Cheap reachability probe used by job preprocessing.
    async fn ping(&self, workspace_id: &str) -> FaultlineResult<()>;
}

/// HTTP code host talking to the GitHub proxy service.
pub struct HttpCodeHost {
    client: Client,
    base_url: String,
}

impl HttpCodeHost {
    pub fn new(base_url: String, timeout_seconds: u64) -> FaultlineResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
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

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> FaultlineResult<T> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(params)
            .send()
            .await
            .map_err(|e| {
                FaultlineError::new(
                    ErrorCode::UpstreamServiceError,
                    ErrorCategory::Network,
                    ErrorSeverity::Medium,
                    &format!("code host unreachable: {}", e),
                )
            })?;

        if !response.status().is_success() {
            return Err(FaultlineError::new(
                ErrorCode::UpstreamServiceError,
                ErrorCategory::Network,
                ErrorSeverity::Medium,
                &format!("code host returned {}", response.status()),
            ));
        }

        response.json::<T>().await.map_err(|e| {
            FaultlineError::new(
                ErrorCode::DeserializationError,
                ErrorCategory::Network,
                ErrorSeverity::Medium,
                &format!("bad code host payload: {}", e),
            )
        })
    }
}

#[async_trait]
impl CodeHost for HttpCodeHost {
    async fn search_code(&self, workspace_id: &str, query: &str) -> FaultlineResult<Vec<String>> {
        self.get_json(
            "/code/search",
            &[
                ("workspace_id", workspace_id.to_string()),
                ("q", query.to_string()),
            ],
        )
        .await
    }

    async fn read_file(&self, workspace_id: &str, repository: &str, path: &str) -> FaultlineResult<String> {
        self.get_json(
            "/code/file",
            &[
                ("workspace_id", workspace_id.to_string()),
                ("repository", repository.to_string()),
                ("path", path.to_string()),
            ],
        )
        .await
    }

    async fn repository_info(&self, workspace_id: &str, repository: &str) -> FaultlineResult<String> {
        self.get_json(
            "/code/repository",
            &[
                ("workspace_id", workspace_id.to_string()),
                ("repository", repository.to_string()),
            ],
        )
        .await
    }

    async fn list_repositories(&self, workspace_id: &str) -> FaultlineResult<Vec<String>> {
        self.get_json(
            "/code/repositories",
            &[("workspace_id", workspace_id.to_string())],
        )
        .await
    }

    async fn ping(&self, workspace_id: &str) -> FaultlineResult<()> {
        let _: Vec<String> = self
            .get_json(
                "/code/repositories",
                &[
                    ("workspace_id", workspace_id.to_string()),
                    ("per_page", "1".to_string()),
                ],
            )
            .await?;
        Ok(())
    }
}

// ==========================================
// TOOL HANDLERS
// ==========================================

pub struct SearchCodeTool {
    host: Arc<dyn CodeHost>,
}

impl SearchCodeTool {
    pub fn new(host: Arc<dyn CodeHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl ToolHandler for SearchCodeTool {
    async fn invoke(&self, arguments: serde_json::Value, workspace_id: &str) -> FaultlineResult<String> {
        let query = match required_str(&arguments, "query") {
            Ok(s) => s,
            Err(msg) => return Ok(msg),
        };
        match self.host.search_code(workspace_id, query).await {
            Ok(hits) if hits.is_empty() => Ok(format!("No code matches for '{}'.", query)),
            Ok(hits) => {
                let shown = hits.len().min(50);
                Ok(format!(
                    "{} code matches (showing {}):\n{}",
                    hits.len(),
                    shown,
                    hits[..shown].join("\n")
                ))
            }
            Err(e) => Ok(format!("Code search failed: {}", e)),
        }
    }
}

pub struct ReadRepositoryFileTool {
    host: Arc<dyn CodeHost>,
}

impl ReadRepositoryFileTool {
    pub fn new(host: Arc<dyn CodeHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl ToolHandler for ReadRepositoryFileTool {
    async fn invoke(&self, arguments: serde_json::Value, workspace_id: &str) -> FaultlineResult<String> {
        let repository = match required_str(&arguments, "repository") {
            Ok(s) => s,
            Err(msg) => return Ok(msg),
        };
        let path = match required_str(&arguments, "path") {
            Ok(s) => s,
            Err(msg) => return Ok(msg),
        };
        match self.host.read_file(workspace_id, repository, path).await {
            Ok(content) if content.is_empty() => {
                Ok(format!("File '{}' in '{}' is empty or does not exist.", path, repository))
            }
            Ok(content) => Ok(content),
            Err(e) => Ok(format!("File read failed: {}", e)),
        }
    }
}

pub struct RepositoryInfoTool {
    host: Arc<dyn CodeHost>,
}

impl RepositoryInfoTool {
    pub fn new(host: Arc<dyn CodeHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl ToolHandler for RepositoryInfoTool {
    async fn invoke(&self, arguments: serde_json::Value, workspace_id: &str) -> FaultlineResult<String> {
        let repository = match required_str(&arguments, "repository") {
            Ok(s) => s,
            Err(msg) => return Ok(msg),
        };
        match self.host.repository_info(workspace_id, repository).await {
            Ok(info) => Ok(info),
            Err(e) => Ok(format!("Repository lookup failed: {}", e)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::StubCodeHost;
    use super::*;

    #[tokio::test]
    async fn missing_file_is_descriptive_text() {
        let host = Arc::new(StubCodeHost::reachable(vec!["org/app"]));
        let tool = ReadRepositoryFileTool::new(host);
        let out = tool
            .invoke(
                serde_json::json!({"repository": "org/app", "path": "src/main.rs"}),
                "ws-1",
            )
            .await
            .unwrap();
        assert!(out.contains("empty or does not exist"));
    }

    #[tokio::test]
    async fn offline_host_is_descriptive_text() {
        let tool = SearchCodeTool::new(Arc::new(StubCodeHost::unreachable()));
        let out = tool
            .invoke(serde_json::json!({"query": "panic"}), "ws-1")
            .await
            .unwrap();
        assert!(out.contains("Code search failed"));
    }
}
