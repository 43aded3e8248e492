use crate::database::Database;
use crate::engines::capability::{CapabilityResolver, HealthProber};
use crate::engines::llm::LlmHandler;
use crate::engines::rca::{RcaConfig, RcaEngine};
use crate::engines::tool_registry::ToolRegistry;
use crate::tools::code::CodeHost;
use crate::tools::observability::ObservabilityGateway;
use std::sync::Arc;

pub mod agent;
pub mod capability;
pub mod intent;
pub mod llm;
pub mod progress;
pub mod rca;
pub mod streaming;
pub mod tool_registry;

/// Wiring for the runtime engines. Constructed once at process start; the
/// worker and API layer share it.
pub struct FaultlineEngines {
    pub llm_handler: Arc<LlmHandler>,
    pub capability_resolver: CapabilityResolver,
    pub tool_registry: Arc<ToolRegistry>,
    pub rca: RcaEngine,
}

impl FaultlineEngines {
    pub fn new(
        db: Database,
        llm_handler: Arc<LlmHandler>,
        observability: Arc<dyn ObservabilityGateway>,
        code_host: Arc<dyn CodeHost>,
        prober: Arc<dyn HealthProber>,
        rca_config: RcaConfig,
    ) -> Self {
        let tool_registry = Arc::new(ToolRegistry::new(observability, code_host));
        let rca = RcaEngine::new(llm_handler.clone(), tool_registry.clone(), rca_config);
        let capability_resolver = CapabilityResolver::new(db, prober);
        Self {
            llm_handler,
            capability_resolver,
            tool_registry,
            rca,
        }
    }

    /// Startup health check: at least one LLM provider must respond.
    pub async fn health_check(&self) -> bool {
        self.llm_handler.health_check().await
    }
}
