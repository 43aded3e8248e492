// RCA state machine: resolve_context -> classify_intent ->
// {conversational | hypothesize -> gather_evidence -> validate ->
// (hypothesize | gather_evidence | synthesize)}.
//
// The loop is bounded: iteration increases on every validate pass and the
// routing always exits once iteration >= max_loops, independent of LLM
// behavior. Node failures are captured into the trace and degraded, never
// raised past node boundaries.

pub mod evidence;
pub mod hypothesis;
pub mod synthesis;
pub mod validation;

use crate::engines::agent::{AgentExecutorBuilder, AgentLimits};
use crate::engines::intent::{routes_to_investigation, IntentClassifier};
use crate::engines::llm::LlmHandler;
use crate::engines::progress::ProgressReporter;
use crate::engines::tool_registry::ToolRegistry;
use crate::types::{
    AnalysisResult, ExecutionContext, JobMetrics, RcaState, TraceEntry, Validation,
    CONVERSATIONAL_FALLBACK_CAPABILITIES,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Enumerable stages of the investigation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveContext,
    ClassifyIntent,
    Conversational,
    Hypothesize,
    GatherEvidence,
    Validate,
    Synthesize,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Conversational | Stage::Synthesize)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::ResolveContext => "resolve_context",
            Stage::ClassifyIntent => "classify_intent",
            Stage::Conversational => "conversational",
            Stage::Hypothesize => "hypothesize",
            Stage::GatherEvidence => "gather_evidence",
            Stage::Validate => "validate",
            Stage::Synthesize => "synthesize",
        }
    }
}

/// Routing decision after a validation pass.
///
/// - any validated hypothesis -> synthesize with the best one
/// - iteration budget exhausted -> synthesize anyway (best effort)
/// - everything rejected -> regenerate hypotheses, not more evidence for a
///   dead end
/// - otherwise some hypotheses still need evidence -> another gather round
pub fn route_after_validation(state: &RcaState) -> Stage {
    let any_validated = state
        .hypotheses
        .iter()
        .any(|h| h.validation == Validation::Validated);
    if any_validated {
        return Stage::Synthesize;
    }
    if state.iteration >= state.max_loops {
        return Stage::Synthesize;
    }
    let all_rejected = !state.hypotheses.is_empty()
        && state
            .hypotheses
            .iter()
            .all(|h| h.validation == Validation::Rejected);
    if all_rejected {
        return Stage::Hypothesize;
    }
    Stage::GatherEvidence
}

#[derive(Debug, Clone)]
pub struct RcaConfig {
    pub max_loops: u32,
    pub retry_attempts: u32,
    pub agent_limits: AgentLimits,
}

impl Default for RcaConfig {
    fn default() -> Self {
        Self {
            max_loops: 2,
            retry_attempts: 2,
            agent_limits: AgentLimits::default(),
        }
    }
}

pub struct RcaEngine {
    pub(crate) llm: Arc<LlmHandler>,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) intent: IntentClassifier,
    pub(crate) config: RcaConfig,
}

impl RcaEngine {
    pub fn new(llm: Arc<LlmHandler>, registry: Arc<ToolRegistry>, config: RcaConfig) -> Self {
        let intent = IntentClassifier::new(llm.clone());
        Self {
            llm,
            registry,
            intent,
            config,
        }
    }

    pub(crate) fn agent_builder(&self) -> AgentExecutorBuilder {
        AgentExecutorBuilder::new(self.llm.clone(), self.registry.clone())
            .with_limits(self.config.agent_limits.clone())
    }

    /// Run one investigation to a terminal stage. This is the sole contract
    /// the job orchestrator depends on; it does not raise for node failures.
    pub async fn analyze(
        &self,
        query: &str,
        context: ExecutionContext,
        callbacks: Option<Arc<ProgressReporter>>,
    ) -> AnalysisResult {
        let mut state = RcaState::new(query, self.config.max_loops, context);
        let mut metrics = JobMetrics::default();
        let started = std::time::Instant::now();

        let mut stage = Stage::ResolveContext;
        loop {
            debug!(stage = stage.name(), iteration = state.iteration, "entering stage");
            if let Some(cb) = &callbacks {
                cb.step_started(stage_label(stage)).await;
            }

            let next = match stage {
                Stage::ResolveContext => {
                    state.push_trace(TraceEntry::ok(
                        stage.name(),
                        format!(
                            "context resolved with {} capabilities",
                            state.execution_context.capabilities.len()
                        ),
                    ));
                    Stage::ClassifyIntent
                }
                Stage::ClassifyIntent => {
                    let intent = self.intent.classify(&state).await;
                    metrics.llm_call_count += 1;
                    state.push_trace(TraceEntry::ok(stage.name(), format!("intent: {}", intent)));
                    state.query_intent = Some(intent.clone());
                    if routes_to_investigation(&intent) {
                        Stage::Hypothesize
                    } else {
                        Stage::Conversational
                    }
                }
                Stage::Conversational => {
                    self.conversational_node(&mut state, &mut metrics, callbacks.clone())
                        .await;
                    Stage::Conversational
                }
                Stage::Hypothesize => {
                    self.hypothesis_node(&mut state, &mut metrics).await;
                    Stage::GatherEvidence
                }
                Stage::GatherEvidence => {
                    self.evidence_node(&mut state, &mut metrics, callbacks.clone())
                        .await;
                    Stage::Validate
                }
                Stage::Validate => {
                    self.validation_node(&mut state, &mut metrics).await;
                    state.iteration += 1;
                    route_after_validation(&state)
                }
                Stage::Synthesize => {
                    self.synthesis_node(&mut state, &mut metrics).await;
                    Stage::Synthesize
                }
            };

            if stage.is_terminal() {
                break;
            }
            stage = next;
        }

        metrics.duration_ms = started.elapsed().as_millis() as u64;
        metrics.iterations = state.iteration;
        metrics.hypothesis_count = state.hypotheses.len() as u32;

        let success = state.error.is_none() && state.report.is_some();
        let output = state
            .report
            .clone()
            .unwrap_or_else(|| "The investigation could not produce a report.".to_string());

        info!(
            success,
            iterations = state.iteration,
            trace_entries = state.trace.len(),
            "analysis finished"
        );

        AnalysisResult {
            output,
            intermediate_steps: state.trace,
            success,
            error: state.error,
            metrics,
        }
    }

    /// Retry wrapper with a fixed attempt count. Returns the same shape with
    /// `success = false` and the last error after exhausting retries.
    pub async fn analyze_with_retry(
        &self,
        query: &str,
        context: ExecutionContext,
        callbacks: Option<Arc<ProgressReporter>>,
    ) -> AnalysisResult {
        let mut last = None;
        for attempt in 0..=self.config.retry_attempts {
            let mut result = self
                .analyze(query, context.clone(), callbacks.clone())
                .await;
            result.metrics.retry_count = attempt;
            if result.success {
                return result;
            }
            warn!(attempt, error = ?result.error, "analysis attempt failed");
            last = Some(result);
        }
        last.unwrap_or(AnalysisResult {
            output: String::new(),
            intermediate_steps: Vec::new(),
            success: false,
            error: Some("analysis retries exhausted".to_string()),
            metrics: JobMetrics::default(),
        })
    }

    /// Conversational terminal node: a smaller agent answers directly, with
    /// a minimal fixed capability set when nothing is healthy.
    async fn conversational_node(
        &self,
        state: &mut RcaState,
        metrics: &mut JobMetrics,
        callbacks: Option<Arc<ProgressReporter>>,
    ) {
        let capabilities = if state.execution_context.capabilities.is_empty() {
            CONVERSATIONAL_FALLBACK_CAPABILITIES.iter().copied().collect()
        } else {
            state.execution_context.capabilities.clone()
        };

        let mut builder = self
            .agent_builder()
            .with_context(&state.execution_context)
            .with_capabilities(capabilities);
        if let Some(cb) = callbacks {
            builder = builder.with_callbacks(cb);
        }

        let history = state
            .execution_context
            .thread_history
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let task = if history.is_empty() {
            state.task.clone()
        } else {
            format!("Conversation so far:\n{}\n\nUser: {}", history, state.task)
        };

        let outcome = match builder.build() {
            Ok(executor) => executor
                .run(
                    "You are an incident analysis assistant. Answer the user's question \
                     directly and concisely, using tools only when they help.",
                    &task,
                )
                .await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(run) => {
                metrics.llm_call_count += run.llm_calls;
                metrics.tool_call_count += run.transcript.len() as u32;
                state.push_trace(TraceEntry::ok(
                    "conversational",
                    format!("answered with {} tool calls", run.transcript.len()),
                ));
                state.report = Some(run.final_text);
            }
            Err(e) => {
                // No degraded answer exists here; surface the failure so the
                // retry wrapper and job-level notification take over.
                state.push_trace(TraceEntry::failed("conversational", e.to_string()));
                state.error = Some(e.to_string());
            }
        }
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::ResolveContext => "Resolving workspace context",
        Stage::ClassifyIntent => "Classifying the request",
        Stage::Conversational => "Answering",
        Stage::Hypothesize => "Generating hypotheses",
        Stage::GatherEvidence => "Gathering evidence",
        Stage::Validate => "Validating hypotheses",
        Stage::Synthesize => "Writing the report",
    }
}
