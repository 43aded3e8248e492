// Log, metric, and alert tools backed by the workspace's observability
// gateway. The gateway hides vendor API shapes behind three queries.

use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError, FaultlineResult};
use crate::tools::{optional_u64, required_str, ToolHandler};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Interface consumed by the log/metric/alert tools. Implementations proxy
/// whichever backend the workspace has connected.
#[async_trait]
pub trait ObservabilityGateway: Send + Sync {
    async fn query_logs(
        &self,
        workspace_id: &str,
        service: &str,
        query: &str,
        minutes: u64,
    ) -> FaultlineResult<Vec<String>>;

    async fn query_metrics(
        &self,
        workspace_id: &str,
        query: &str,
        minutes: u64,
    ) -> FaultlineResult<String>;

    async fn active_alerts(&self, workspace_id: &str) -> FaultlineResult<Vec<String>>;
}

/// HTTP gateway hitting the observability proxy service.
pub struct HttpObservabilityGateway {
    client: Client,
    base_url: String,
}

impl HttpObservabilityGateway {
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

    async fn get_lines(&self, path: &str, params: &[(&str, String)]) -> FaultlineResult<Vec<String>> {
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
                    &format!("observability gateway unreachable: {}", e),
                )
            })?;

        if !response.status().is_success() {
            return Err(FaultlineError::new(
                ErrorCode::UpstreamServiceError,
                ErrorCategory::Network,
                ErrorSeverity::Medium,
                &format!("observability gateway returned {}", response.status()),
            ));
        }

        response.json::<Vec<String>>().await.map_err(|e| {
            FaultlineError::new(
                ErrorCode::DeserializationError,
                ErrorCategory::Network,
                ErrorSeverity::Medium,
                &format!("bad gateway payload: {}", e),
            )
        })
    }
}

#[async_trait]
impl ObservabilityGateway for HttpObservabilityGateway {
    async fn query_logs(
        &self,
        workspace_id: &str,
        service: &str,
        query: &str,
        minutes: u64,
    ) -> FaultlineResult<Vec<String>> {
        self.get_lines(
            "/logs/query",
            &[
                ("workspace_id", workspace_id.to_string()),
                ("service", service.to_string()),
                ("query", query.to_string()),
                ("minutes", minutes.to_string()),
            ],
        )
        .await
    }

    async fn query_metrics(
        &self,
        workspace_id: &str,
        query: &str,
        minutes: u64,
    ) -> FaultlineResult<String> {
        let lines = self
            .get_lines(
                "/metrics/query",
                &[
                    ("workspace_id", workspace_id.to_string()),
                    ("query", query.to_string()),
                    ("minutes", minutes.to_string()),
                ],
            )
            .await?;
        Ok(lines.join("\n"))
    }

    async fn active_alerts(&self, workspace_id: &str) -> FaultlineResult<Vec<String>> {
        self.get_lines(
            "/alerts/active",
            &[("workspace_id", workspace_id.to_string())],
        )
        .await
    }
}

// ==========================================
// TOOL HANDLERS
// ==========================================

pub struct FetchLogsTool {
    gateway: Arc<dyn ObservabilityGateway>,
}

impl FetchLogsTool {
    pub fn new(gateway: Arc<dyn ObservabilityGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ToolHandler for FetchLogsTool {
    async fn invoke(&self, arguments: serde_json::Value, workspace_id: &str) -> FaultlineResult<String> {
        let service = match required_str(&arguments, "service") {
            Ok(s) => s,
            Err(msg) => return Ok(msg),
        };
        let query = arguments.get("query").and_then(|v| v.as_str()).unwrap_or("");
        let minutes = optional_u64(&arguments, "minutes", 60);

        match self
            .gateway
            .query_logs(workspace_id, service, query, minutes)
            .await
        {
            Ok(lines) if lines.is_empty() => Ok(format!(
                "No log lines matched for service '{}' in the last {} minutes.",
                service, minutes
            )),
            Ok(lines) => {
                let shown = lines.len().min(200);
                Ok(format!(
                    "{} log lines for service '{}' (showing {}):\n{}",
                    lines.len(),
                    service,
                    shown,
                    lines[..shown].join("\n")
                ))
            }
            Err(e) => Ok(format!("Log query failed: {}", e)),
        }
    }
}

pub struct QueryMetricsTool {
    gateway: Arc<dyn ObservabilityGateway>,
}

impl QueryMetricsTool {
    pub fn new(gateway: Arc<dyn ObservabilityGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ToolHandler for QueryMetricsTool {
    async fn invoke(&self, arguments: serde_json::Value, workspace_id: &str) -> FaultlineResult<String> {
        let query = match required_str(&arguments, "query") {
            Ok(s) => s,
            Err(msg) => return Ok(msg),
        };
        let minutes = optional_u64(&arguments, "minutes", 60);

        match self.gateway.query_metrics(workspace_id, query, minutes).await {
            Ok(result) if result.trim().is_empty() => Ok(format!(
                "Metric query '{}' returned no series for the last {} minutes.",
                query, minutes
            )),
            Ok(result) => Ok(result),
            Err(e) => Ok(format!("Metric query failed: {}", e)),
        }
    }
}

pub struct ListAlertsTool {
    gateway: Arc<dyn ObservabilityGateway>,
}

impl ListAlertsTool {
    pub fn new(gateway: Arc<dyn ObservabilityGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ToolHandler for ListAlertsTool {
    async fn invoke(&self, _arguments: serde_json::Value, workspace_id: &str) -> FaultlineResult<String> {
        match self.gateway.active_alerts(workspace_id).await {
            Ok(alerts) if alerts.is_empty() => {
                Ok("No alerts are currently firing.".to_string())
            }
            Ok(alerts) => Ok(format!("{} firing alerts:\n{}", alerts.len(), alerts.join("\n"))),
            Err(e) => Ok(format!("Alert lookup failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyGateway;

    #[async_trait]
    impl ObservabilityGateway for EmptyGateway {
        async fn query_logs(&self, _: &str, _: &str, _: &str, _: u64) -> FaultlineResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn query_metrics(&self, _: &str, _: &str, _: u64) -> FaultlineResult<String> {
            Ok(String::new())
        }
        async fn active_alerts(&self, _: &str) -> FaultlineResult<Vec<String>> {
            Err(FaultlineError::new(
                ErrorCode::UpstreamServiceError,
                ErrorCategory::Network,
                ErrorSeverity::Medium,
                "backend unreachable",
            ))
        }
    }

    #[tokio::test]
    async fn empty_results_render_as_text_not_errors() {
        let tool = FetchLogsTool::new(Arc::new(EmptyGateway));
        let out = tool
            .invoke(serde_json::json!({"service": "checkout"}), "ws-1")
            .await
            .unwrap();
        assert!(out.contains("No log lines matched"));
    }

    #[tokio::test]
    async fn upstream_failure_becomes_descriptive_string() {
        let tool = ListAlertsTool::new(Arc::new(EmptyGateway));
        let out = tool.invoke(serde_json::json!({}), "ws-1").await.unwrap();
        assert!(out.contains("Alert lookup failed"));
    }

    #[tokio::test]
    async fn missing_argument_is_reported_to_the_model() {
        let tool = QueryMetricsTool::new(Arc::new(EmptyGateway));
        let out = tool.invoke(serde_json::json!({}), "ws-1").await.unwrap();
        assert!(out.contains("missing required argument 'query'"));
    }
}
