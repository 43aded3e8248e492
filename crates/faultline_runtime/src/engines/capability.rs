// Capability resolver: maps a workspace's healthy integrations to the
// abstract capability set one RCA invocation may use.

use crate::database::integrations::IntegrationOps;
use crate::database::Database;
use crate::errors::FaultlineResult;
use crate::types::{
    provider_capabilities, Capability, ExecutionContext, HealthStatus, Integration,
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Live health probe for one integration. Implementations hit the provider's
/// cheapest authenticated endpoint.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, integration: &Integration) -> FaultlineResult<HealthStatus>;
}

pub struct CapabilityResolver {
    db: Database,
    prober: Arc<dyn HealthProber>,
}

impl CapabilityResolver {
    pub fn new(db: Database, prober: Arc<dyn HealthProber>) -> Self {
        Self { db, prober }
    }

    /// Resolve the execution context for one investigation.
    ///
    /// A stored "healthy" flag is trusted as-is; an unknown or "failed" flag
    /// triggers a live probe so a recovered integration comes back without
    /// manual intervention. A probe failure excludes that one integration
    /// and never aborts resolution for the others.
    pub async fn resolve(&self, workspace_id: &str) -> FaultlineResult<ExecutionContext> {
        let integrations = IntegrationOps::for_workspace(self.db.pool(), workspace_id).await?;

        let mut accepted: Vec<Integration> = Vec::new();
        for mut integration in integrations {
            match integration.health_status {
                Some(HealthStatus::Healthy) => accepted.push(integration),
                _ => match self.prober.probe(&integration).await {
                    Ok(status) => {
                        if let Err(e) =
                            IntegrationOps::update_health(self.db.pool(), integration.id, status).await
                        {
                            warn!(provider = %integration.provider, error = %e, "failed to persist probe result");
                        }
                        integration.health_status = Some(status);
                        if status == HealthStatus::Healthy {
                            accepted.push(integration);
                        } else {
                            debug!(provider = %integration.provider, "integration probed unhealthy, excluded");
                        }
                    }
                    Err(e) => {
                        warn!(provider = %integration.provider, error = %e, "health probe failed, excluding integration");
                    }
                },
            }
        }

        let mut capabilities: BTreeSet<Capability> = BTreeSet::new();
        for integration in &accepted {
            capabilities.extend(provider_capabilities(&integration.provider).iter().copied());
        }

        debug!(workspace_id, capabilities = ?capabilities, "resolved capabilities");

        Ok(ExecutionContext::new(workspace_id)
            .with_capabilities(capabilities)
            .with_integrations(accepted))
    }
}

/// Prober backed by the same gateways the tools use: GitHub-family
/// integrations ping the code host, everything else issues a cheap
/// observability query.
pub struct GatewayHealthProber {
    code_host: Arc<dyn crate::tools::code::CodeHost>,
    observability: Arc<dyn crate::tools::observability::ObservabilityGateway>,
}

impl GatewayHealthProber {
    pub fn new(
        code_host: Arc<dyn crate::tools::code::CodeHost>,
        observability: Arc<dyn crate::tools::observability::ObservabilityGateway>,
    ) -> Self {
        Self {
            code_host,
            observability,
        }
    }
}

#[async_trait]
impl HealthProber for GatewayHealthProber {
    async fn probe(&self, integration: &Integration) -> FaultlineResult<HealthStatus> {
        let healthy = match integration.provider.as_str() {
            "github" => self.code_host.ping(&integration.workspace_id).await.is_ok(),
            _ => self
                .observability
                .active_alerts(&integration.workspace_id)
                .await
                .is_ok(),
        };
        Ok(if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Failed
        })
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Probe stub returning a fixed status per provider name.
    pub struct StubProber {
        pub statuses: HashMap<String, HealthStatus>,
        pub probed: Mutex<Vec<String>>,
    }

    impl StubProber {
        pub fn new(statuses: Vec<(&str, HealthStatus)>) -> Self {
            Self {
                statuses: statuses
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                probed: Mutex::new(Vec::new()),
            }
        }

        pub fn probe_count(&self) -> usize {
            self.probed.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HealthProber for StubProber {
        async fn probe(&self, integration: &Integration) -> FaultlineResult<HealthStatus> {
            self.probed.lock().unwrap().push(integration.provider.clone());
            self.statuses.get(&integration.provider).copied().ok_or_else(|| {
                FaultlineError::new(
                    ErrorCode::HealthCheckFailed,
                    ErrorCategory::Capability,
                    ErrorSeverity::Medium,
                    &format!("probe blew up for {}", integration.provider),
                )
            })
        }
    }
}
