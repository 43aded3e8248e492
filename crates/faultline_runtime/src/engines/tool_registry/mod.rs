use crate::engines::llm::types::ToolDefinition;
use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError, FaultlineResult};
use crate::tools::code::{CodeHost, ReadRepositoryFileTool, RepositoryInfoTool, SearchCodeTool};
use crate::tools::observability::{
    FetchLogsTool, ListAlertsTool, ObservabilityGateway, QueryMetricsTool,
};
use crate::tools::ToolHandler;
use crate::types::Capability;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Registry entry describing one callable tool.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub capability: Capability,
}

/// A tool bound to a workspace at agent-build time. The model sees the
/// definition; the workspace id is captured here and never taken from model
/// output.
#[derive(Clone)]
pub struct BoundTool {
    entry: RegistryEntry,
    handler: Arc<dyn ToolHandler>,
    workspace_id: String,
}

impl BoundTool {
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.entry.name.clone(),
            description: self.entry.description.clone(),
            parameters: self.entry.parameters.clone(),
        }
    }

    pub async fn invoke(&self, arguments: serde_json::Value) -> FaultlineResult<String> {
        self.handler.invoke(arguments, &self.workspace_id).await
    }
}

/// Static capability -> tool table plus the handler instances. Registered
/// once at process start; the agent builder asks for the subset implied by
/// the resolved capability set.
pub struct ToolRegistry {
    entries: Vec<RegistryEntry>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new(
        observability: Arc<dyn ObservabilityGateway>,
        code_host: Arc<dyn CodeHost>,
    ) -> Self {
        let mut registry = Self {
            entries: Vec::new(),
            handlers: HashMap::new(),
        };

        registry.register(
            Self::fetch_logs_entry(),
            Arc::new(FetchLogsTool::new(observability.clone())),
        );
        registry.register(
            Self::query_metrics_entry(),
            Arc::new(QueryMetricsTool::new(observability.clone())),
        );
        registry.register(
            Self::list_alerts_entry(),
            Arc::new(ListAlertsTool::new(observability)),
        );
        registry.register(
            Self::search_code_entry(),
            Arc::new(SearchCodeTool::new(code_host.clone())),
        );
        registry.register(
            Self::read_repository_file_entry(),
            Arc::new(ReadRepositoryFileTool::new(code_host.clone())),
        );
        registry.register(
            Self::repository_info_entry(),
            Arc::new(RepositoryInfoTool::new(code_host)),
        );

        registry
    }

    fn register(&mut self, entry: RegistryEntry, handler: Arc<dyn ToolHandler>) {
        tracing::debug!(tool = %entry.name, capability = ?entry.capability, "registering tool");
        self.handlers.insert(entry.name.clone(), handler);
        self.entries.push(entry);
    }

    /// Names of every tool gated behind any of the given capabilities.
    pub fn tool_names_for_capabilities(&self, capabilities: &BTreeSet<Capability>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| capabilities.contains(&e.capability))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Bind the tools implied by the capability set to a workspace.
    pub fn bind(
        &self,
        capabilities: &BTreeSet<Capability>,
        workspace_id: &str,
    ) -> Vec<BoundTool> {
        self.entries
            .iter()
            .filter(|e| capabilities.contains(&e.capability))
            .map(|entry| BoundTool {
                entry: entry.clone(),
                handler: self.handlers[&entry.name].clone(),
                workspace_id: workspace_id.to_string(),
            })
            .collect()
    }

    pub fn get_bound(&self, name: &str, workspace_id: &str) -> FaultlineResult<BoundTool> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| {
                FaultlineError::new(
                    ErrorCode::ToolNotFound,
                    ErrorCategory::Tool,
                    ErrorSeverity::Medium,
                    &format!("Tool '{}' not found in registry", name),
                )
            })?;
        Ok(BoundTool {
            entry: entry.clone(),
            handler: self.handlers[&entry.name].clone(),
            workspace_id: workspace_id.to_string(),
        })
    }

    fn fetch_logs_entry() -> RegistryEntry {
        RegistryEntry {
            name: "fetch_logs".to_string(),
            description: "Fetch recent log lines for a service, optionally filtered by a search query".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "service": { "type": "string", "description": "Service name to fetch logs for" },
                    "query": { "type": "string", "description": "Substring or pattern to filter on" },
                    "minutes": { "type": "number", "description": "Lookback window in minutes", "default": 60 }
                },
                "required": ["service"]
            }),
            capability: Capability::Logs,
        }
    }

    fn query_metrics_entry() -> RegistryEntry {
        RegistryEntry {
            name: "query_metrics".to_string(),
            description: "Run a metrics query (error rate, latency, saturation) over a lookback window".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Metric query expression" },
                    "minutes": { "type": "number", "description": "Lookback window in minutes", "default": 60 }
                },
                "required": ["query"]
            }),
            capability: Capability::Metrics,
        }
    }

    fn list_alerts_entry() -> RegistryEntry {
        RegistryEntry {
            name: "list_alerts".to_string(),
            description: "List currently firing alerts for the workspace".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
            capability: Capability::Alerts,
        }
    }

    fn search_code_entry() -> RegistryEntry {
        RegistryEntry {
            name: "search_code".to_string(),
            description: "Search the workspace's repositories for a code pattern".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Code search query" }
                },
                "required": ["query"]
            }),
            capability: Capability::CodeSearch,
        }
    }

    fn read_repository_file_entry() -> RegistryEntry {
        RegistryEntry {
            name: "read_repository_file".to_string(),
            description: "Read one file from a repository".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "repository": { "type": "string", "description": "Repository full name" },
                    "path": { "type": "string", "description": "File path within the repository" }
                },
                "required": ["repository", "path"]
            }),
            capability: Capability::CodeRead,
        }
    }

    fn repository_info_entry() -> RegistryEntry {
        RegistryEntry {
            name: "repository_info".to_string(),
            description: "Get metadata about a repository (branches, recent activity)".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "repository": { "type": "string", "description": "Repository full name" }
                },
                "required": ["repository"]
            }),
            capability: Capability::RepositoryInfo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::code::test_support::StubCodeHost;
    use crate::tools::observability::ObservabilityGateway;
    use async_trait::async_trait;

    struct NoopGateway;

    #[async_trait]
    impl ObservabilityGateway for NoopGateway {
        async fn query_logs(&self, _: &str, _: &str, _: &str, _: u64) -> FaultlineResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn query_metrics(&self, _: &str, _: &str, _: u64) -> FaultlineResult<String> {
            Ok(String::new())
        }
        async fn active_alerts(&self, _: &str) -> FaultlineResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(
            Arc::new(NoopGateway),
            Arc::new(StubCodeHost::reachable(vec!["org/app"])),
        )
    }

    #[test]
    fn binding_filters_by_capability() {
        let registry = registry();
        let caps: BTreeSet<Capability> = [Capability::Logs, Capability::CodeRead].into();
        let bound = registry.bind(&caps, "ws-1");
        let names: Vec<&str> = bound.iter().map(|t| t.name()).collect();
        assert!(names.contains(&"fetch_logs"));
        assert!(names.contains(&"read_repository_file"));
        assert!(!names.contains(&"query_metrics"));
        assert!(!names.contains(&"search_code"));
    }

    #[test]
    fn empty_capabilities_bind_no_tools() {
        let registry = registry();
        assert!(registry.bind(&BTreeSet::new(), "ws-1").is_empty());
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let registry = registry();
        assert!(registry.get_bound("parse_json", "ws-1").is_err());
    }
}
