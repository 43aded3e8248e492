use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Unique identifier for a job
pub type JobId = Uuid;

/// Workspace identifier (tenant scope)
pub type WorkspaceId = String;

// ==========================================
// CAPABILITIES & INTEGRATIONS
// ==========================================

/// Abstract permission tag gating which tools an agent may call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    Logs,
    Metrics,
    Alerts,
    CodeSearch,
    CodeRead,
    RepositoryInfo,
}

/// Static provider -> capability table. The resolver never returns a
/// capability outside this mapping for the integrations it accepted.
pub fn provider_capabilities(provider: &str) -> &'static [Capability] {
    match provider {
        "github" => &[
            Capability::CodeSearch,
            Capability::CodeRead,
            Capability::RepositoryInfo,
        ],
        "grafana" => &[Capability::Logs, Capability::Metrics],
        "aws" => &[Capability::Logs, Capability::Metrics],
        "datadog" => &[Capability::Logs, Capability::Metrics, Capability::Alerts],
        "newrelic" => &[Capability::Metrics, Capability::Alerts],
        _ => &[],
    }
}

/// Minimal capability set for the conversational branch when no integration
/// is healthy. A tool-less agent is useless; repository lookups are safe.
pub const CONVERSATIONAL_FALLBACK_CAPABILITIES: &[Capability] =
    &[Capability::CodeSearch, Capability::RepositoryInfo];

/// Persisted health of one integration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Failed,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "healthy" => Some(HealthStatus::Healthy),
            "failed" => Some(HealthStatus::Failed),
            _ => None,
        }
    }
}

/// One configured third-party integration for a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: Uuid,
    pub workspace_id: WorkspaceId,
    pub provider: String,
    pub enabled: bool,
    /// None means the integration has never been probed.
    pub health_status: Option<HealthStatus>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

// ==========================================
// EXECUTION CONTEXT
// ==========================================

/// Resolved, scoped view of one RCA invocation. Immutable after
/// construction; capability overrides build a new context.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workspace_id: WorkspaceId,
    pub capabilities: BTreeSet<Capability>,
    pub integrations: Vec<Integration>,
    /// service name -> repository names
    pub service_mapping: HashMap<String, Vec<String>>,
    pub thread_history: Vec<ThreadMessage>,
    pub environment: HashMap<String, String>,
    pub ownership: HashMap<String, String>,
}

impl ExecutionContext {
    pub fn new(workspace_id: impl Into<WorkspaceId>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            capabilities: BTreeSet::new(),
            integrations: Vec::new(),
            service_mapping: HashMap::new(),
            thread_history: Vec::new(),
            environment: HashMap::new(),
            ownership: HashMap::new(),
        }
    }

    /// Explicit builder operation replacing the resolved capability set.
    pub fn with_capabilities(mut self, capabilities: BTreeSet<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_integrations(mut self, integrations: Vec<Integration>) -> Self {
        self.integrations = integrations;
        self
    }

    pub fn with_service_mapping(mut self, mapping: HashMap<String, Vec<String>>) -> Self {
        self.service_mapping = mapping;
        self
    }

    pub fn with_thread_history(mut self, history: Vec<ThreadMessage>) -> Self {
        self.thread_history = history;
        self
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// One prior message in a conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: String,
    pub content: String,
}

// ==========================================
// JOBS
// ==========================================

/// Where a job was requested from; decides the delivery channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobSource {
    Web,
    Slack,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::Web => "WEB",
            JobSource::Slack => "SLACK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WEB" => Some(JobSource::Web),
            "SLACK" => Some(JobSource::Slack),
            _ => None,
        }
    }
}

/// Job status. Transitions only QUEUED -> RUNNING -> {COMPLETED | FAILED}.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(JobStatus::Queued),
            "RUNNING" => Some(JobStatus::Running),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Request payload captured at enqueue time. The queue message carries only
/// the job id; everything else lives here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestedContext {
    pub query: String,
    #[serde(default)]
    pub thread_history: Vec<ThreadMessage>,
    #[serde(default)]
    pub turn_id: Option<String>,
    /// Reversible placeholder -> original mapping produced by PII masking.
    #[serde(default)]
    pub pii_mapping: HashMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Slack delivery coordinates, present when source == SLACK.
    #[serde(default)]
    pub slack_channel: Option<String>,
    #[serde(default)]
    pub slack_thread_ts: Option<String>,
}

/// One unit of asynchronous RCA or chat work, tracked to completion or
/// failure. Rows are append-only; the worker is the only mutator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub workspace_id: WorkspaceId,
    pub source: JobSource,
    pub status: JobStatus,
    pub requested_context: RequestedContext,
    pub report: Option<String>,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub backoff_until: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub metrics: Option<JobMetrics>,
}

/// Execution metrics persisted with a completed job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetrics {
    pub duration_ms: u64,
    pub iterations: u32,
    pub tool_call_count: u32,
    pub llm_call_count: u32,
    pub hypothesis_count: u32,
    pub retry_count: u32,
}

// ==========================================
// HYPOTHESES & EVIDENCE
// ==========================================

/// Verdict assigned to a hypothesis by the validation stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Validation {
    Pending,
    Validated,
    Rejected,
    NeedsMoreEvidence,
}

/// A candidate explanation for an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub hypothesis_text: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub validation: Validation,
    /// Only meaningful when validation == Validated; clamped to [0, 100].
    pub confidence: u8,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

impl Hypothesis {
    pub fn pending(text: impl Into<String>) -> Self {
        Self {
            hypothesis_text: text.into(),
            evidence: Vec::new(),
            validation: Validation::Pending,
            confidence: 0,
            rationale: String::new(),
            next_steps: Vec::new(),
        }
    }

    pub fn set_confidence(&mut self, confidence: i64) {
        self.confidence = confidence.clamp(0, 100) as u8;
    }
}

/// Accumulated findings gathered by tool calls during one investigation:
/// free-form evidence per hypothesis plus one global note.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceBoard {
    /// Indexed by position in the current hypothesis batch.
    pub per_hypothesis: HashMap<usize, Vec<String>>,
    pub note: Option<String>,
}

impl EvidenceBoard {
    pub fn is_empty(&self) -> bool {
        self.per_hypothesis.values().all(|v| v.is_empty())
    }
}

// ==========================================
// RCA STATE & TRACE
// ==========================================

/// Auditable record of one state-machine stage. Append-only; errors are
/// captured here instead of crossing node boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage: String,
    pub summary: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TraceEntry {
    pub fn ok(stage: &str, summary: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            summary: summary.into(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(stage: &str, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            stage: stage.to_string(),
            summary: format!("{} failed", stage),
            error: Some(error),
            timestamp: Utc::now(),
        }
    }
}

/// Mutable state threaded through the RCA state machine. Created fresh per
/// analyze() call; only its report/trace projection survives into the Job.
#[derive(Debug, Clone)]
pub struct RcaState {
    pub task: String,
    pub workspace_id: WorkspaceId,
    pub query_intent: Option<String>,
    pub hypotheses: Vec<Hypothesis>,
    pub evidence_board: EvidenceBoard,
    pub root_cause: Option<String>,
    pub report: Option<String>,
    pub trace: Vec<TraceEntry>,
    /// Superseded hypothesis batches, oldest first.
    pub history: Vec<Vec<Hypothesis>>,
    pub iteration: u32,
    pub max_loops: u32,
    pub execution_context: ExecutionContext,
    pub error: Option<String>,
}

impl RcaState {
    pub fn new(task: impl Into<String>, max_loops: u32, context: ExecutionContext) -> Self {
        Self {
            task: task.into(),
            workspace_id: context.workspace_id.clone(),
            query_intent: None,
            hypotheses: Vec::new(),
            evidence_board: EvidenceBoard::default(),
            root_cause: None,
            report: None,
            trace: Vec::new(),
            history: Vec::new(),
            iteration: 0,
            max_loops,
            execution_context: context,
            error: None,
        }
    }

    /// Supersede the current batch, keeping it for the audit trail.
    pub fn replace_hypotheses(&mut self, batch: Vec<Hypothesis>) {
        if !self.hypotheses.is_empty() {
            self.history.push(std::mem::take(&mut self.hypotheses));
        }
        self.hypotheses = batch;
        self.evidence_board = EvidenceBoard::default();
    }

    pub fn push_trace(&mut self, entry: TraceEntry) {
        self.trace.push(entry);
    }
}

// ==========================================
// ANALYSIS RESULT
// ==========================================

/// The sole contract the job orchestrator depends on: the projection of a
/// finished (or exhausted) graph run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub output: String,
    pub intermediate_steps: Vec<TraceEntry>,
    pub success: bool,
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: JobMetrics,
}

// ==========================================
// REVIEWS (consumed, not owned)
// ==========================================

/// Periodic health-review cadence row. The core only reads enough of it to
/// decide whether a review job is due.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSchedule {
    pub id: Uuid,
    pub workspace_id: WorkspaceId,
    pub service_name: String,
    pub interval_hours: i64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ReviewSchedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_run_at {
            None => true,
            Some(last) => now - last >= chrono::Duration::hours(self.interval_hours),
        }
    }
}

/// A produced health-review report record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceReview {
    pub id: Uuid,
    pub workspace_id: WorkspaceId,
    pub service_name: String,
    pub report: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_table_is_closed() {
        assert!(provider_capabilities("pagerduty").is_empty());
        assert!(provider_capabilities("github").contains(&Capability::CodeRead));
    }

    #[test]
    fn confidence_is_clamped() {
        let mut h = Hypothesis::pending("db connection pool exhausted");
        h.set_confidence(250);
        assert_eq!(h.confidence, 100);
        h.set_confidence(-5);
        assert_eq!(h.confidence, 0);
    }

    #[test]
    fn superseded_hypotheses_move_to_history() {
        let ctx = ExecutionContext::new("ws-1");
        let mut state = RcaState::new("api errors spiking", 2, ctx);
        state.replace_hypotheses(vec![Hypothesis::pending("first batch")]);
        state.replace_hypotheses(vec![Hypothesis::pending("second batch")]);
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.hypotheses[0].hypothesis_text, "second batch");
    }

    #[test]
    fn review_due_when_never_run() {
        let schedule = ReviewSchedule {
            id: Uuid::new_v4(),
            workspace_id: "ws-1".to_string(),
            service_name: "checkout".to_string(),
            interval_hours: 24,
            last_run_at: None,
        };
        assert!(schedule.is_due(Utc::now()));
    }
}
