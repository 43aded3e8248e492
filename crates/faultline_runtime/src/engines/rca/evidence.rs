// Evidence gathering node. Runs a tool-calling agent constrained to the
// exact bound tool list. With zero capabilities it short-circuits to an
// empty board with an explanatory note and attempts no tool calls. On
// JSON-extraction failure it salvages a minimal board by scanning raw tool
// transcripts for interesting lines instead of losing everything gathered.

use crate::engines::agent::ToolInvocation;
use crate::engines::progress::ProgressReporter;
use crate::engines::rca::RcaEngine;
use crate::json_extract::extract_json;
use crate::types::{EvidenceBoard, JobMetrics, RcaState, TraceEntry, Validation};
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::warn;

const STAGE: &str = "gather_evidence";
const MAX_INTERESTING_LINES: usize = 40;

fn interesting_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(exception|traceback|panic|stack trace|rate.?limit|timeout|timed out|refused|oom|out of memory|deadlock|5\d\d\s|error|select\s.+\sfrom|insert\s+into)",
        )
        .unwrap()
    })
}

impl RcaEngine {
    pub(crate) async fn evidence_node(
        &self,
        state: &mut RcaState,
        metrics: &mut JobMetrics,
        callbacks: Option<Arc<ProgressReporter>>,
    ) {
        if state.execution_context.capabilities.is_empty() {
            let mut board = EvidenceBoard::default();
            board.note = Some(
                "No healthy integrations were available, so no evidence could be gathered."
                    .to_string(),
            );
            state.evidence_board = board;
            state.push_trace(TraceEntry::ok(
                STAGE,
                "skipped: no capabilities, empty evidence board",
            ));
            return;
        }

        let mut builder = self.agent_builder().with_context(&state.execution_context);
        if let Some(cb) = callbacks {
            builder = builder.with_callbacks(cb);
        }
        let executor = match builder.build() {
            Ok(executor) => executor,
            Err(e) => {
                state.push_trace(TraceEntry::failed(STAGE, e.to_string()));
                state.evidence_board.note =
                    Some("Evidence gathering could not start.".to_string());
                return;
            }
        };

        let tool_names = executor.tool_names().join(", ");
        let active: Vec<(usize, String)> = state
            .hypotheses
            .iter()
            .enumerate()
            .filter(|(_, h)| h.validation != Validation::Rejected)
            .map(|(i, h)| (i, h.hypothesis_text.clone()))
            .collect();

        let mut task = format!("Incident: {}\n\nHypotheses under investigation:\n", state.task);
        for (index, text) in &active {
            task.push_str(&format!("{}. {}\n", index, text));
        }
        task.push_str(&format!(
            "\nGather evidence for or against each hypothesis using the available tools. \
             The only tools that exist are: {}. There is no generic \"json\" or \"parse\" \
             tool; do not attempt to call one.\n\
             When you are done, respond with a JSON object mapping each hypothesis index to \
             an array of evidence strings, plus an optional \"note\" string. Example: \
             {{\"0\": [\"finding\"], \"note\": \"...\"}}",
            tool_names
        ));

        let run = match executor
            .run(
                "You are an SRE gathering evidence for incident hypotheses. Use tools; \
                 cite concrete log lines, metric values, and code locations.",
                &task,
            )
            .await
        {
            Ok(run) => run,
            Err(e) => {
                // Iteration/time limits abort this sub-call only
                state.push_trace(TraceEntry::failed(STAGE, e.to_string()));
                state.evidence_board.note =
                    Some(format!("Evidence gathering was cut short: {}", e));
                return;
            }
        };

        metrics.llm_call_count += run.llm_calls;
        metrics.tool_call_count += run.transcript.len() as u32;

        let board = match parse_evidence_board(&run.final_text) {
            Some(board) => {
                state.push_trace(TraceEntry::ok(
                    STAGE,
                    format!(
                        "evidence gathered with {} tool calls for {} hypotheses",
                        run.transcript.len(),
                        board.per_hypothesis.len()
                    ),
                ));
                board
            }
            None => {
                warn!("evidence output unparseable, scanning transcripts");
                state.push_trace(TraceEntry::failed(
                    STAGE,
                    "unparseable evidence output, recovered from tool transcripts",
                ));
                board_from_transcripts(&run.transcript, active.iter().map(|(i, _)| *i).collect())
            }
        };

        // Mirror findings onto the hypotheses themselves for validation
        for (index, findings) in &board.per_hypothesis {
            if let Some(hypothesis) = state.hypotheses.get_mut(*index) {
                hypothesis.evidence.extend(findings.iter().cloned());
            }
        }
        state.evidence_board = board;
    }
}

fn parse_evidence_board(raw: &str) -> Option<EvidenceBoard> {
    let value = extract_json(raw)?;
    let map = value.as_object()?;
    let mut board = EvidenceBoard::default();
    for (key, entry) in map {
        if key == "note" {
            board.note = entry.as_str().map(String::from);
            continue;
        }
        let Ok(index) = key.parse::<usize>() else {
            continue;
        };
        let findings: Vec<String> = match entry {
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            serde_json::Value::String(s) => vec![s.clone()],
            _ => continue,
        };
        board.per_hypothesis.insert(index, findings);
    }
    if board.per_hypothesis.is_empty() && board.note.is_none() {
        None
    } else {
        Some(board)
    }
}

/// Salvage pass: pattern-match interesting lines out of raw tool output and
/// attach them to every active hypothesis.
fn board_from_transcripts(transcript: &[ToolInvocation], active: Vec<usize>) -> EvidenceBoard {
    let mut lines: Vec<String> = Vec::new();
    'scan: for invocation in transcript {
        for line in invocation.output.lines() {
            if interesting_line_re().is_match(line) {
                lines.push(format!("[{}] {}", invocation.tool_name, line.trim()));
                if lines.len() >= MAX_INTERESTING_LINES {
                    break 'scan;
                }
            }
        }
    }

    let mut board = EvidenceBoard::default();
    board.note = Some(format!(
        "Evidence board reconstructed from {} raw tool transcripts.",
        transcript.len()
    ));
    for index in active {
        board.per_hypothesis.insert(index, lines.clone());
    }
    board
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::llm::providers::scripted::{ScriptedProvider, ScriptedResponse};
    use crate::engines::llm::types::ToolCall;
    use crate::engines::rca::test_support::{engine_with, engine_with_shared};
    use crate::types::{Capability, ExecutionContext, Hypothesis};

    fn investigating_state(capabilities: Vec<Capability>) -> RcaState {
        let ctx = ExecutionContext::new("ws-1")
            .with_capabilities(capabilities.into_iter().collect());
        let mut state = RcaState::new("checkout 500s", 2, ctx);
        state.hypotheses = vec![
            Hypothesis::pending("db pool exhausted"),
            Hypothesis::pending("bad deploy"),
        ];
        state
    }

    #[tokio::test]
    async fn zero_capabilities_short_circuits_without_tool_calls() {
        let engine = engine_with(ScriptedProvider::with_contents(vec![])).await;
        let mut state = investigating_state(vec![]);
        let mut metrics = JobMetrics::default();

        engine.evidence_node(&mut state, &mut metrics, None).await;

        assert!(state.evidence_board.is_empty());
        assert!(state.evidence_board.note.as_ref().unwrap().contains("No healthy integrations"));
        assert_eq!(metrics.tool_call_count, 0);
        assert_eq!(metrics.llm_call_count, 0);
    }

    #[tokio::test]
    async fn parsed_board_lands_on_hypotheses() {
        let provider = ScriptedProvider::new(vec![
            ScriptedResponse::ToolCalls(vec![ToolCall {
                id: "c1".to_string(),
                name: "fetch_logs".to_string(),
                arguments: r#"{"service": "checkout"}"#.to_string(),
            }]),
            ScriptedResponse::Content(
                r#"{"0": ["pool exhausted at 12:01"], "1": [], "note": "logs only"}"#.to_string(),
            ),
        ]);
        let engine = engine_with(provider).await;
        let mut state = investigating_state(vec![Capability::Logs]);
        let mut metrics = JobMetrics::default();

        engine.evidence_node(&mut state, &mut metrics, None).await;

        assert_eq!(state.hypotheses[0].evidence.len(), 1);
        assert_eq!(state.evidence_board.note.as_deref(), Some("logs only"));
        assert_eq!(metrics.tool_call_count, 1);
    }

    #[tokio::test]
    async fn unparseable_output_recovers_interesting_lines_from_transcripts() {
        let provider = ScriptedProvider::new(vec![
            ScriptedResponse::ToolCalls(vec![ToolCall {
                id: "c1".to_string(),
                name: "fetch_logs".to_string(),
                arguments: r#"{"service": "checkout"}"#.to_string(),
            }]),
            ScriptedResponse::Content("here's what I found, no JSON though".to_string()),
        ]);
        let engine = engine_with(provider).await;
        let mut state = investigating_state(vec![Capability::Logs]);
        let mut metrics = JobMetrics::default();

        engine.evidence_node(&mut state, &mut metrics, None).await;

        assert!(state
            .evidence_board
            .note
            .as_ref()
            .unwrap()
            .contains("reconstructed"));
        // The gateway's ERROR line was salvaged onto the active hypotheses
        assert!(state.hypotheses[0]
            .evidence
            .iter()
            .any(|l| l.contains("connection pool exhausted")));
        assert!(state.trace.iter().any(|t| t.error.is_some()));
    }

    #[test]
    fn transcript_scan_picks_stack_traces_and_rate_limits() {
        let transcript = vec![ToolInvocation {
            tool_name: "fetch_logs".to_string(),
            arguments: serde_json::Value::Null,
            output: "INFO all good\nERROR rate limit exceeded for tenant 42\n\
                     java.lang.NullPointerException\n  at com.example.Foo(Foo.java:42)\nboring line"
                .to_string(),
        }];
        let board = board_from_transcripts(&transcript, vec![0]);
        let findings = &board.per_hypothesis[&0];
        assert!(findings.iter().any(|l| l.contains("rate limit")));
        assert!(findings.iter().any(|l| l.contains("NullPointerException")));
        assert!(!findings.iter().any(|l| l.contains("boring line")));
    }

    #[tokio::test]
    async fn rejected_hypotheses_are_not_investigated_again() {
        let provider = Arc::new(ScriptedProvider::with_contents(vec![r#"{"1": ["x"]}"#]));
        let engine = engine_with_shared(provider.clone()).await;

        let mut state = investigating_state(vec![Capability::Logs]);
        state.hypotheses[0].validation = Validation::Rejected;
        let mut metrics = JobMetrics::default();

        engine.evidence_node(&mut state, &mut metrics, None).await;

        let requests = provider.recorded_requests();
        let task = &requests[0].messages[1].content;
        assert!(task.contains("1. bad deploy"));
        assert!(!task.contains("0. db pool exhausted"));
    }
}
