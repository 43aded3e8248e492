// Hypothesis generation node. Tool-calling is disabled; the model is asked
// for a JSON batch of 5-8 hypotheses. Any parse failure degrades to exactly
// one generic hypothesis; an investigation must always have something to
// work with.

use crate::engines::llm::types::{LlmConfig, LlmMessage, LlmRequest};
use crate::engines::rca::RcaEngine;
use crate::json_extract::extract_json_array;
use crate::types::{Hypothesis, JobMetrics, RcaState, TraceEntry, Validation};
use tracing::warn;

const STAGE: &str = "hypothesize";

impl RcaEngine {
    pub(crate) async fn hypothesis_node(&self, state: &mut RcaState, metrics: &mut JobMetrics) {
        let mut prompt = format!(
            "An incident is being investigated.\n\nIncident description: {}\n\n",
            state.task
        );
        if !state.history.is_empty() {
            let rejected: Vec<&str> = state
                .history
                .iter()
                .flatten()
                .filter(|h| h.validation == Validation::Rejected)
                .map(|h| h.hypothesis_text.as_str())
                .collect();
            if !rejected.is_empty() {
                prompt.push_str("These explanations were already ruled out, propose different ones:\n");
                for text in rejected {
                    prompt.push_str(&format!("- {}\n", text));
                }
                prompt.push('\n');
            }
        }
        if !state.execution_context.service_mapping.is_empty() {
            let services: Vec<&str> = state
                .execution_context
                .service_mapping
                .keys()
                .map(String::as_str)
                .collect();
            prompt.push_str(&format!("Known services: {}\n\n", services.join(", ")));
        }
        prompt.push_str(
            "Propose 5 to 8 distinct root-cause hypotheses. Respond with a JSON array; each \
             element must have \"hypothesis_text\" (string), \"rationale\" (string) and \
             \"next_steps\" (array of strings). No other output.",
        );

        let request = LlmRequest::completion(
            vec![
                LlmMessage::system(
                    "You are an experienced SRE generating candidate explanations for a production incident.",
                ),
                LlmMessage::user(prompt),
            ],
            LlmConfig {
                temperature: 0.7,
                max_tokens: 2048,
                ..Default::default()
            },
        );

        let batch = match self.llm.complete(request).await {
            Ok(response) => {
                metrics.llm_call_count += 1;
                parse_hypotheses(&response.content)
            }
            Err(e) => {
                metrics.llm_call_count += 1;
                warn!(error = %e, "hypothesis generation call failed");
                None
            }
        };

        match batch {
            Some(hypotheses) if !hypotheses.is_empty() => {
                state.push_trace(TraceEntry::ok(
                    STAGE,
                    format!("generated {} hypotheses", hypotheses.len()),
                ));
                state.replace_hypotheses(hypotheses);
            }
            _ => {
                state.push_trace(TraceEntry::failed(
                    STAGE,
                    "unparseable hypothesis output, using generic fallback",
                ));
                state.replace_hypotheses(vec![generic_fallback(&state.task)]);
            }
        }
    }
}

fn parse_hypotheses(raw: &str) -> Option<Vec<Hypothesis>> {
    let items = extract_json_array(raw)?;
    let hypotheses: Vec<Hypothesis> = items
        .into_iter()
        .filter_map(|item| {
            let text = item.get("hypothesis_text")?.as_str()?.trim().to_string();
            if text.is_empty() {
                return None;
            }
            let mut hypothesis = Hypothesis::pending(text);
            if let Some(rationale) = item.get("rationale").and_then(|v| v.as_str()) {
                hypothesis.rationale = rationale.to_string();
            }
            if let Some(steps) = item.get("next_steps").and_then(|v| v.as_array()) {
                hypothesis.next_steps = steps
                    .iter()
                    .filter_map(|s| s.as_str().map(String::from))
                    .collect();
            }
            Some(hypothesis)
        })
        .collect();

    if hypotheses.is_empty() {
        None
    } else {
        Some(hypotheses)
    }
}

fn generic_fallback(task: &str) -> Hypothesis {
    let mut hypothesis = Hypothesis::pending(format!(
        "A recent change or dependency failure is causing the reported problem: {}",
        task
    ));
    hypothesis.rationale =
        "Fallback hypothesis generated because the model output could not be parsed.".to_string();
    hypothesis.next_steps = vec![
        "Check recent deployments and configuration changes".to_string(),
        "Inspect error logs around the incident window".to_string(),
    ];
    hypothesis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::llm::providers::scripted::ScriptedProvider;
    use crate::engines::rca::test_support::{engine_with, engine_with_shared};
    use crate::types::ExecutionContext;
    use std::sync::Arc;

    #[tokio::test]
    async fn valid_batch_is_parsed() {
        let raw = r#"[
            {"hypothesis_text": "connection pool exhausted", "rationale": "timeouts", "next_steps": ["check pool metrics"]},
            {"hypothesis_text": "bad deploy", "rationale": "timing", "next_steps": []}
        ]"#;
        let engine = engine_with(ScriptedProvider::with_contents(vec![raw])).await;
        let mut state = RcaState::new("api 500s", 2, ExecutionContext::new("ws-1"));
        let mut metrics = JobMetrics::default();

        engine.hypothesis_node(&mut state, &mut metrics).await;

        assert_eq!(state.hypotheses.len(), 2);
        assert!(state
            .hypotheses
            .iter()
            .all(|h| h.validation == Validation::Pending));
    }

    #[tokio::test]
    async fn unparseable_output_yields_exactly_one_pending_fallback() {
        let engine =
            engine_with(ScriptedProvider::with_contents(vec!["sorry, I cannot do JSON"])).await;
        let mut state = RcaState::new("api 500s", 2, ExecutionContext::new("ws-1"));
        let mut metrics = JobMetrics::default();

        engine.hypothesis_node(&mut state, &mut metrics).await;

        assert_eq!(state.hypotheses.len(), 1);
        assert_eq!(state.hypotheses[0].validation, Validation::Pending);
        assert!(state.trace.iter().any(|t| t.error.is_some()));
    }

    #[tokio::test]
    async fn previously_rejected_hypotheses_are_excluded_from_the_prompt() {
        let provider = Arc::new(ScriptedProvider::with_contents(vec![
            r#"[{"hypothesis_text": "fresh idea"}]"#,
        ]));
        let engine = engine_with_shared(provider.clone()).await;

        let mut state = RcaState::new("api 500s", 2, ExecutionContext::new("ws-1"));
        let mut rejected = crate::types::Hypothesis::pending("dns failure");
        rejected.validation = Validation::Rejected;
        state.history.push(vec![rejected]);

        let mut metrics = JobMetrics::default();
        engine.hypothesis_node(&mut state, &mut metrics).await;

        let requests = provider.recorded_requests();
        assert!(requests[0].messages[1].content.contains("dns failure"));
        assert!(requests[0].messages[1].content.contains("ruled out"));
    }
}
