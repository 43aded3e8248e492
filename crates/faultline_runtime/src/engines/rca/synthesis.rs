// Synthesis node. Picks the single best hypothesis (highest confidence among
// validated, else among needs_more_evidence, else none) and asks for a final
// Markdown report. Total failure still yields a placeholder report; RCA must
// always produce something.

use crate::engines::llm::types::{LlmConfig, LlmMessage, LlmRequest};
use crate::engines::rca::RcaEngine;
use crate::types::{Hypothesis, JobMetrics, RcaState, TraceEntry, Validation};
use tracing::warn;

const STAGE: &str = "synthesize";

impl RcaEngine {
    pub(crate) async fn synthesis_node(&self, state: &mut RcaState, metrics: &mut JobMetrics) {
        let best = pick_best_hypothesis(&state.hypotheses);

        let mut prompt = format!("Incident under investigation: {}\n\n", state.task);
        match best {
            Some(hypothesis) => {
                state.root_cause = Some(hypothesis.hypothesis_text.clone());
                prompt.push_str(&format!(
                    "Most likely root cause ({}, confidence {}):\n{}\n\nSupporting evidence:\n",
                    match hypothesis.validation {
                        Validation::Validated => "validated",
                        _ => "unconfirmed",
                    },
                    hypothesis.confidence,
                    hypothesis.hypothesis_text
                ));
                if hypothesis.evidence.is_empty() {
                    prompt.push_str("(none collected)\n");
                } else {
                    for finding in &hypothesis.evidence {
                        prompt.push_str(&format!("- {}\n", finding));
                    }
                }
                if !hypothesis.next_steps.is_empty() {
                    prompt.push_str("\nSuggested next steps:\n");
                    for step in &hypothesis.next_steps {
                        prompt.push_str(&format!("- {}\n", step));
                    }
                }
            }
            None => {
                prompt.push_str(
                    "No hypothesis could be validated with the available evidence.\n",
                );
                if let Some(note) = &state.evidence_board.note {
                    prompt.push_str(&format!("Investigation note: {}\n", note));
                }
            }
        }
        prompt.push_str(
            "\nWrite a concise incident report in Markdown with sections: Summary, \
             Root Cause (or Findings if unconfirmed), Evidence, Recommended Actions.",
        );

        let request = LlmRequest::completion(
            vec![
                LlmMessage::system(
                    "You write clear, factual incident reports for engineers. Do not invent evidence.",
                ),
                LlmMessage::user(prompt),
            ],
            LlmConfig {
                temperature: 0.3,
                max_tokens: 2048,
                ..Default::default()
            },
        );

        match self.llm.complete(request).await {
            Ok(response) if !response.content.trim().is_empty() => {
                metrics.llm_call_count += 1;
                state.push_trace(TraceEntry::ok(STAGE, "report generated"));
                state.report = Some(response.content);
            }
            Ok(_) => {
                metrics.llm_call_count += 1;
                state.push_trace(TraceEntry::failed(STAGE, "empty report output"));
                state.report = Some(placeholder_report(state));
            }
            Err(e) => {
                metrics.llm_call_count += 1;
                warn!(error = %e, "report synthesis failed");
                state.push_trace(TraceEntry::failed(STAGE, e.to_string()));
                state.report = Some(placeholder_report(state));
            }
        }
    }
}

/// Highest confidence among validated hypotheses, else among those needing
/// more evidence, else none.
pub(crate) fn pick_best_hypothesis(hypotheses: &[Hypothesis]) -> Option<&Hypothesis> {
    let validated = hypotheses
        .iter()
        .filter(|h| h.validation == Validation::Validated)
        .max_by_key(|h| h.confidence);
    if validated.is_some() {
        return validated;
    }
    hypotheses
        .iter()
        .filter(|h| h.validation == Validation::NeedsMoreEvidence)
        .max_by_key(|h| h.confidence)
}

fn placeholder_report(state: &RcaState) -> String {
    format!(
        "## Summary\n\nThe investigation of \"{}\" could not determine a root cause.\n\n\
         ## Findings\n\nNo hypothesis was validated with the evidence available. \
         Consider connecting more integrations or re-running the analysis.\n",
        state.task
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::llm::providers::scripted::{ScriptedProvider, ScriptedResponse};
    use crate::engines::rca::test_support::engine_with;
    use crate::types::ExecutionContext;

    fn hypothesis(text: &str, validation: Validation, confidence: u8) -> Hypothesis {
        let mut h = Hypothesis::pending(text);
        h.validation = validation;
        h.confidence = confidence;
        h
    }

    #[test]
    fn validated_beats_higher_confidence_inconclusive() {
        let hypotheses = vec![
            hypothesis("inconclusive but confident", Validation::NeedsMoreEvidence, 95),
            hypothesis("validated", Validation::Validated, 60),
        ];
        assert_eq!(
            pick_best_hypothesis(&hypotheses).unwrap().hypothesis_text,
            "validated"
        );
    }

    #[test]
    fn falls_back_to_needs_more_evidence_then_none() {
        let hypotheses = vec![
            hypothesis("a", Validation::NeedsMoreEvidence, 30),
            hypothesis("b", Validation::NeedsMoreEvidence, 70),
            hypothesis("c", Validation::Rejected, 99),
        ];
        assert_eq!(pick_best_hypothesis(&hypotheses).unwrap().hypothesis_text, "b");

        let all_rejected = vec![hypothesis("c", Validation::Rejected, 99)];
        assert!(pick_best_hypothesis(&all_rejected).is_none());
    }

    #[tokio::test]
    async fn report_is_written_and_root_cause_recorded() {
        let engine = engine_with(ScriptedProvider::with_contents(vec![
            "## Summary\npool exhaustion",
        ]))
        .await;
        let mut state = RcaState::new("api 500s", 2, ExecutionContext::new("ws-1"));
        state.hypotheses = vec![hypothesis("pool exhausted", Validation::Validated, 90)];
        let mut metrics = JobMetrics::default();

        engine.synthesis_node(&mut state, &mut metrics).await;

        assert_eq!(state.root_cause.as_deref(), Some("pool exhausted"));
        assert!(state.report.as_ref().unwrap().contains("pool exhaustion"));
    }

    #[tokio::test]
    async fn total_failure_still_produces_a_placeholder_report() {
        let engine = engine_with(ScriptedProvider::new(vec![ScriptedResponse::Failure(
            "provider down".to_string(),
        )]))
        .await;
        let mut state = RcaState::new("api 500s", 2, ExecutionContext::new("ws-1"));
        let mut metrics = JobMetrics::default();

        engine.synthesis_node(&mut state, &mut metrics).await;

        let report = state.report.unwrap();
        assert!(report.contains("could not determine a root cause"));
        assert!(state.trace.iter().any(|t| t.error.is_some()));
    }
}
