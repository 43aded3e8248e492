// Agent executor: a tool-calling completion loop restricted to the tools
// implied by the resolved capabilities, bounded by iteration count and
// wall-clock time. Exceeding either bound fails that one agent invocation
// with a recoverable error, never the whole job.

use crate::engines::llm::types::{LlmConfig, LlmMessage, LlmRequest, ToolChoice};
use crate::engines::llm::LlmHandler;
use crate::engines::progress::ProgressReporter;
use crate::engines::tool_registry::{BoundTool, ToolRegistry};
use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError, FaultlineResult};
use crate::types::{Capability, ExecutionContext};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One tool invocation recorded in the agent transcript.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub output: String,
}

/// Result of one agent run.
#[derive(Debug, Clone, Default)]
pub struct AgentRun {
    pub final_text: String,
    pub transcript: Vec<ToolInvocation>,
    pub llm_calls: u32,
    pub iterations: u32,
}

#[derive(Debug, Clone)]
pub struct AgentLimits {
    pub max_iterations: u32,
    pub max_execution_time: Duration,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            max_execution_time: Duration::from_secs(300),
        }
    }
}

/// Builder for an agent scoped to one workspace and capability set.
pub struct AgentExecutorBuilder {
    llm: Arc<LlmHandler>,
    registry: Arc<ToolRegistry>,
    context: Option<ExecutionContext>,
    capability_override: Option<BTreeSet<Capability>>,
    callbacks: Option<Arc<ProgressReporter>>,
    limits: AgentLimits,
    llm_config: LlmConfig,
}

impl AgentExecutorBuilder {
    pub fn new(llm: Arc<LlmHandler>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            registry,
            context: None,
            capability_override: None,
            callbacks: None,
            limits: AgentLimits::default(),
            llm_config: LlmConfig::default(),
        }
    }

    pub fn with_context(mut self, context: &ExecutionContext) -> Self {
        self.context = Some(context.clone());
        self
    }

    /// Explicit capability override; resolved state is never mutated.
    pub fn with_capabilities(mut self, capabilities: BTreeSet<Capability>) -> Self {
        self.capability_override = Some(capabilities);
        self
    }

    pub fn with_callbacks(mut self, callbacks: Arc<ProgressReporter>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn with_limits(mut self, limits: AgentLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_llm_config(mut self, llm_config: LlmConfig) -> Self {
        self.llm_config = llm_config;
        self
    }

    pub fn build(self) -> FaultlineResult<AgentExecutor> {
        let context = self.context.ok_or_else(|| {
            FaultlineError::new(
                ErrorCode::ContextResolutionError,
                ErrorCategory::Agent,
                ErrorSeverity::High,
                "Agent executor requires an execution context",
            )
        })?;

        let capabilities = self
            .capability_override
            .unwrap_or_else(|| context.capabilities.clone());
        let tools = self.registry.bind(&capabilities, &context.workspace_id);

        Ok(AgentExecutor {
            llm: self.llm,
            tools,
            callbacks: self.callbacks,
            limits: self.limits,
            llm_config: self.llm_config,
        })
    }
}

pub struct AgentExecutor {
    llm: Arc<LlmHandler>,
    tools: Vec<BoundTool>,
    callbacks: Option<Arc<ProgressReporter>>,
    limits: AgentLimits,
    llm_config: LlmConfig,
}

impl AgentExecutor {
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Run the tool-calling loop to completion or a limit.
    pub async fn run(&self, system_prompt: &str, task: &str) -> FaultlineResult<AgentRun> {
        let work = self.run_inner(system_prompt, task);
        match tokio::time::timeout(self.limits.max_execution_time, work).await {
            Ok(result) => result,
            Err(_) => Err(FaultlineError::new(
                ErrorCode::AgentTimeout,
                ErrorCategory::Agent,
                ErrorSeverity::Medium,
                &format!(
                    "Agent exceeded max execution time of {}s",
                    self.limits.max_execution_time.as_secs()
                ),
            )),
        }
    }

    async fn run_inner(&self, system_prompt: &str, task: &str) -> FaultlineResult<AgentRun> {
        let mut messages = vec![LlmMessage::system(system_prompt), LlmMessage::user(task)];
        let mut run = AgentRun::default();

        let tool_definitions = if self.tools.is_empty() {
            None
        } else {
            Some(self.tools.iter().map(|t| t.definition()).collect())
        };

        loop {
            if run.iterations >= self.limits.max_iterations {
                if let Some(cb) = &self.callbacks {
                    cb.agent_finished("stopped at iteration limit").await;
                }
                return Err(FaultlineError::new(
                    ErrorCode::AgentIterationLimit,
                    ErrorCategory::Agent,
                    ErrorSeverity::Medium,
                    &format!("Agent exceeded {} iterations", self.limits.max_iterations),
                ));
            }
            run.iterations += 1;

            let request = LlmRequest {
                messages: messages.clone(),
                config: self.llm_config.clone(),
                provider: None,
                tools: tool_definitions.clone(),
                tool_choice: tool_definitions.as_ref().map(|_| ToolChoice::Auto),
            };

            let response = self.llm.complete(request).await?;
            run.llm_calls += 1;

            let tool_calls = match response.tool_calls {
                Some(calls) if !calls.is_empty() => calls,
                _ => {
                    run.final_text = response.content;
                    if let Some(cb) = &self.callbacks {
                        cb.agent_finished("agent produced final answer").await;
                    }
                    return Ok(run);
                }
            };

            messages.push(LlmMessage {
                role: "assistant".to_string(),
                content: response.content,
                tool_calls: Some(tool_calls.clone()),
                tool_call_id: None,
            });

            for call in tool_calls {
                let output = self.invoke_tool(&call.name, &call.arguments).await;
                debug!(tool = %call.name, output_len = output.1.len(), "tool call finished");
                run.transcript.push(ToolInvocation {
                    tool_name: call.name.clone(),
                    arguments: output.0,
                    output: output.1.clone(),
                });
                messages.push(LlmMessage::tool(call.id, output.1));
            }
        }
    }

    /// Invoke one bound tool. Failures are rendered as descriptive strings
    /// for the model to adapt to; an unknown tool name is reported the same
    /// way rather than aborting the run.
    async fn invoke_tool(&self, name: &str, raw_arguments: &str) -> (serde_json::Value, String) {
        let arguments: serde_json::Value =
            serde_json::from_str(raw_arguments).unwrap_or(serde_json::Value::Null);

        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            warn!(tool = name, "model requested a tool outside its bound set");
            let available = self.tool_names().join(", ");
            return (
                arguments,
                format!("Tool '{}' does not exist. Available tools: {}", name, available),
            );
        };

        if let Some(cb) = &self.callbacks {
            cb.tool_started(name).await;
        }

        match tool.invoke(arguments.clone()).await {
            Ok(output) => {
                if let Some(cb) = &self.callbacks {
                    cb.tool_finished(name).await;
                }
                (arguments, output)
            }
            Err(e) => {
                if let Some(cb) = &self.callbacks {
                    cb.tool_failed(name, &e.to_string()).await;
                }
                (arguments, format!("Tool '{}' failed: {}", name, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::llm::providers::scripted::{ScriptedProvider, ScriptedResponse};
    use crate::engines::llm::types::ToolCall;
    use crate::engines::llm::LlmHandlerConfig;
    use crate::engines::tool_registry::ToolRegistry;
    use crate::tools::code::test_support::StubCodeHost;
    use crate::tools::observability::ObservabilityGateway;
    use async_trait::async_trait;

    struct CannedGateway;

    #[async_trait]
    impl ObservabilityGateway for CannedGateway {
        async fn query_logs(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: u64,
        ) -> FaultlineResult<Vec<String>> {
            Ok(vec!["ERROR timeout connecting to db".to_string()])
        }
        async fn query_metrics(&self, _: &str, _: &str, _: u64) -> FaultlineResult<String> {
            Ok("error_rate: 0.42".to_string())
        }
        async fn active_alerts(&self, _: &str) -> FaultlineResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::new(
            Arc::new(CannedGateway),
            Arc::new(StubCodeHost::reachable(vec!["org/app"])),
        ))
    }

    async fn handler(provider: ScriptedProvider) -> Arc<LlmHandler> {
        let handler = LlmHandler::new(LlmHandlerConfig {
            max_retries: 0,
            ..Default::default()
        });
        handler.register_provider(Arc::new(provider)).await;
        Arc::new(handler)
    }

    fn context_with_logs() -> ExecutionContext {
        ExecutionContext::new("ws-1").with_capabilities([Capability::Logs].into())
    }

    #[tokio::test]
    async fn tool_call_round_trip_reaches_final_answer() {
        let provider = ScriptedProvider::new(vec![
            ScriptedResponse::ToolCalls(vec![ToolCall {
                id: "call-1".to_string(),
                name: "fetch_logs".to_string(),
                arguments: r#"{"service": "checkout"}"#.to_string(),
            }]),
            ScriptedResponse::Content("logs show db timeouts".to_string()),
        ]);

        let executor = AgentExecutorBuilder::new(handler(provider).await, registry())
            .with_context(&context_with_logs())
            .build()
            .unwrap();

        let run = executor.run("you are an SRE", "investigate checkout").await.unwrap();
        assert_eq!(run.final_text, "logs show db timeouts");
        assert_eq!(run.transcript.len(), 1);
        assert!(run.transcript[0].output.contains("ERROR timeout"));
        assert_eq!(run.llm_calls, 2);
    }

    #[tokio::test]
    async fn iteration_limit_is_a_recoverable_error() {
        // Model keeps calling tools forever
        let script: Vec<ScriptedResponse> = (0..10)
            .map(|i| {
                ScriptedResponse::ToolCalls(vec![ToolCall {
                    id: format!("call-{}", i),
                    name: "fetch_logs".to_string(),
                    arguments: r#"{"service": "checkout"}"#.to_string(),
                }])
            })
            .collect();
        let provider = ScriptedProvider::new(script);

        let executor = AgentExecutorBuilder::new(handler(provider).await, registry())
            .with_context(&context_with_logs())
            .with_limits(AgentLimits {
                max_iterations: 2,
                max_execution_time: Duration::from_secs(30),
            })
            .build()
            .unwrap();

        let err = executor.run("sys", "task").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AgentIterationLimit);
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn hallucinated_tool_name_is_reported_not_fatal() {
        let provider = ScriptedProvider::new(vec![
            ScriptedResponse::ToolCalls(vec![ToolCall {
                id: "call-1".to_string(),
                name: "parse_json".to_string(),
                arguments: "{}".to_string(),
            }]),
            ScriptedResponse::Content("understood".to_string()),
        ]);

        let executor = AgentExecutorBuilder::new(handler(provider).await, registry())
            .with_context(&context_with_logs())
            .build()
            .unwrap();

        let run = executor.run("sys", "task").await.unwrap();
        assert!(run.transcript[0].output.contains("does not exist"));
        assert_eq!(run.final_text, "understood");
    }

    #[tokio::test]
    async fn capability_override_restricts_tools() {
        let provider = ScriptedProvider::with_contents(vec!["no tools used"]);
        let context = ExecutionContext::new("ws-1")
            .with_capabilities([Capability::Logs, Capability::Metrics].into());

        let executor = AgentExecutorBuilder::new(handler(provider).await, registry())
            .with_context(&context)
            .with_capabilities([Capability::Metrics].into())
            .build()
            .unwrap();

        assert_eq!(executor.tool_names(), vec!["query_metrics"]);
    }
}
