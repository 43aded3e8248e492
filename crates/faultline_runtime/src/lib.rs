/*!
# Faultline Runtime

Core library for the Faultline incident RCA backend. It implements the
capability-gated agentic investigation workflow and the asynchronous job
lifecycle that drives it.

## Architecture

- **RCA State Machine**: hypothesize → gather evidence → validate →
  synthesize, with a conversational short-circuit and a bounded retry loop
- **Capability Resolver**: maps a workspace's healthy integrations to the
  abstract capabilities gating tool access
- **Tool Registry & Agent Executor**: capability→tool table with workspace
  binding and iteration/time-limited tool-calling agents
- **Job Worker**: queue polling, idempotent dequeue, backoff re-enqueue,
  centralized failure notification
- **Progress Callbacks**: Slack/Web streaming side-channel behind a circuit
  breaker
*/

pub mod cache;
pub mod database;
pub mod engines;
pub mod errors;
pub mod json_extract;
pub mod pii;
pub mod tools;
pub mod types;
pub mod worker;

// Re-export main components
pub use database::{Database, DatabaseConfig};
pub use engines::agent::{AgentExecutor, AgentExecutorBuilder, AgentLimits};
pub use engines::capability::{CapabilityResolver, HealthProber};
pub use engines::llm::{LlmHandler, LlmHandlerConfig, LlmProvider};
pub use engines::progress::{CircuitBreaker, ProgressConfig, ProgressReporter, ProgressSink};
pub use engines::rca::{RcaConfig, RcaEngine, Stage};
pub use engines::streaming::{sse_router, WebChannels};
pub use engines::tool_registry::ToolRegistry;
pub use engines::FaultlineEngines;
pub use errors::{FaultlineError, FaultlineResult};
pub use types::{AnalysisResult, Capability, ExecutionContext, Job, JobSource, JobStatus};
pub use worker::queue::{InMemoryQueue, JobQueue, SqsQueue};
pub use worker::{enqueue_job, JobWorker, WorkerConfig};

/// Runtime version
pub const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");
