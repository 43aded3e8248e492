pub mod providers;
pub mod types;

use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError, FaultlineResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use types::{LlmRequest, LlmResponse};

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Whether this provider supports function calling
    fn supports_tools(&self) -> bool;

    /// Complete a request
    async fn complete(&self, request: LlmRequest) -> FaultlineResult<LlmResponse>;

    /// Health check
    async fn health_check(&self) -> FaultlineResult<bool>;
}

#[derive(Debug, Clone)]
pub struct LlmHandlerConfig {
    pub default_timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for LlmHandlerConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 60,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Provider-abstraction layer. Constructed once at process start and injected
/// wherever completions are made; retries transient provider failures with a
/// fixed delay before giving up.
pub struct LlmHandler {
    providers: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
    default_provider: RwLock<Option<String>>,
    config: LlmHandlerConfig,
}

impl LlmHandler {
    pub fn new(config: LlmHandlerConfig) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            default_provider: RwLock::new(None),
            config,
        }
    }

    pub async fn register_provider(&self, provider: Arc<dyn LlmProvider>) {
        let name = provider.name().to_lowercase();
        {
            let mut providers = self.providers.write().await;
            providers.insert(name.clone(), provider);
        }
        let mut default_provider = self.default_provider.write().await;
        if default_provider.is_none() {
            *default_provider = Some(name);
        }
    }

    pub async fn available_providers(&self) -> Vec<String> {
        self.providers.read().await.keys().cloned().collect()
    }

    async fn provider_for(&self, request: &LlmRequest) -> FaultlineResult<Arc<dyn LlmProvider>> {
        let name = match &request.provider {
            Some(name) => name.to_lowercase(),
            None => self
                .default_provider
                .read()
                .await
                .clone()
                .ok_or_else(|| {
                    FaultlineError::new(
                        ErrorCode::LLMProviderNotFound,
                        ErrorCategory::LLM,
                        ErrorSeverity::High,
                        "No provider specified and no default provider available",
                    )
                })?,
        };

        self.providers.read().await.get(&name).cloned().ok_or_else(|| {
            FaultlineError::new(
                ErrorCode::LLMProviderNotFound,
                ErrorCategory::LLM,
                ErrorSeverity::High,
                &format!("Provider '{}' not found", name),
            )
        })
    }

    /// Complete an LLM request, retrying transient failures.
    pub async fn complete(&self, request: LlmRequest) -> FaultlineResult<LlmResponse> {
        let provider = self.provider_for(&request).await?;
        debug!(provider = provider.name(), messages = request.messages.len(), "llm completion");

        let mut last_error: Option<FaultlineError> = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.retry_delay_ms * attempt as u64,
                ))
                .await;
            }
            match provider.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retriable() && attempt < self.config.max_retries => {
                    warn!(attempt, error = %err, "llm call failed, retrying");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            FaultlineError::new(
                ErrorCode::LLMError,
                ErrorCategory::LLM,
                ErrorSeverity::High,
                "LLM retries exhausted",
            )
        }))
    }

    /// Simple single-prompt inference helper.
    pub async fn inference(&self, prompt: &str, config: types::LlmConfig) -> FaultlineResult<String> {
        let request = LlmRequest::completion(vec![types::LlmMessage::user(prompt)], config);
        let response = self.complete(request).await?;
        Ok(response.content)
    }

    pub async fn health_check(&self) -> bool {
        let providers = self.providers.read().await;
        for provider in providers.values() {
            if matches!(provider.health_check().await, Ok(true)) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::providers::scripted::ScriptedProvider;
    use super::types::{LlmConfig, LlmMessage, LlmRequest};
    use super::*;

    #[tokio::test]
    async fn first_registered_provider_becomes_default() {
        let handler = LlmHandler::new(LlmHandlerConfig::default());
        handler
            .register_provider(Arc::new(ScriptedProvider::with_contents(vec!["ok"])))
            .await;

        let request = LlmRequest::completion(
            vec![LlmMessage::user("ping")],
            LlmConfig::default(),
        );
        let response = handler.complete(request).await.unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn unknown_provider_is_an_error() {
        let handler = LlmHandler::new(LlmHandlerConfig::default());
        let mut request = LlmRequest::completion(
            vec![LlmMessage::user("ping")],
            LlmConfig::default(),
        );
        request.provider = Some("missing".to_string());
        let err = handler.complete(request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LLMProviderNotFound);
    }
}
