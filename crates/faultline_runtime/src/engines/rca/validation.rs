// Validation node. Each hypothesis is classified independently into
// validated / rejected / needs_more_evidence with a confidence score.
// Nothing here is irrecoverable: rejected hypotheses are excluded from
// future evidence gathering but never deleted, and a failed classification
// degrades to needs_more_evidence.

use crate::engines::llm::types::{LlmConfig, LlmMessage, LlmRequest};
use crate::engines::rca::RcaEngine;
use crate::json_extract::extract_json;
use crate::types::{JobMetrics, RcaState, TraceEntry, Validation};
use tracing::warn;

const STAGE: &str = "validate";

impl RcaEngine {
    pub(crate) async fn validation_node(&self, state: &mut RcaState, metrics: &mut JobMetrics) {
        let board_note = state.evidence_board.note.clone();
        let mut validated = 0usize;
        let mut rejected = 0usize;
        let mut inconclusive = 0usize;

        for index in 0..state.hypotheses.len() {
            if state.hypotheses[index].validation == Validation::Rejected {
                continue;
            }

            let hypothesis = &state.hypotheses[index];
            let mut prompt = format!(
                "Incident: {}\n\nHypothesis: {}\n\nEvidence gathered:\n",
                state.task, hypothesis.hypothesis_text
            );
            if hypothesis.evidence.is_empty() {
                prompt.push_str("(none)\n");
            } else {
                for finding in &hypothesis.evidence {
                    prompt.push_str(&format!("- {}\n", finding));
                }
            }
            if let Some(note) = &board_note {
                prompt.push_str(&format!("\nInvestigation note: {}\n", note));
            }
            prompt.push_str(
                "\nClassify this hypothesis. Respond with a JSON object: \
                 {\"validation\": \"validated\"|\"rejected\"|\"needs_more_evidence\", \
                 \"confidence\": 0-100, \"rationale\": \"...\"}",
            );

            let request = LlmRequest::completion(
                vec![
                    LlmMessage::system(
                        "You are a skeptical incident reviewer judging whether evidence supports a hypothesis.",
                    ),
                    LlmMessage::user(prompt),
                ],
                LlmConfig {
                    temperature: 0.0,
                    max_tokens: 512,
                    ..Default::default()
                },
            );

            let verdict = match self.llm.complete(request).await {
                Ok(response) => {
                    metrics.llm_call_count += 1;
                    parse_verdict(&response.content)
                }
                Err(e) => {
                    metrics.llm_call_count += 1;
                    warn!(error = %e, index, "validation call failed");
                    None
                }
            };

            let hypothesis = &mut state.hypotheses[index];
            match verdict {
                Some((validation, confidence, rationale)) => {
                    hypothesis.validation = validation;
                    hypothesis.set_confidence(confidence);
                    if !rationale.is_empty() {
                        hypothesis.rationale = rationale;
                    }
                    match validation {
                        Validation::Validated => validated += 1,
                        Validation::Rejected => rejected += 1,
                        _ => inconclusive += 1,
                    }
                }
                None => {
                    hypothesis.validation = Validation::NeedsMoreEvidence;
                    inconclusive += 1;
                }
            }
        }

        state.push_trace(TraceEntry::ok(
            STAGE,
            format!(
                "validated {}, rejected {}, inconclusive {}",
                validated, rejected, inconclusive
            ),
        ));
    }
}

fn parse_verdict(raw: &str) -> Option<(Validation, i64, String)> {
    let value = extract_json(raw)?;
    let validation = match value.get("validation")?.as_str()? {
        "validated" => Validation::Validated,
        "rejected" => Validation::Rejected,
        "needs_more_evidence" => Validation::NeedsMoreEvidence,
        _ => return None,
    };
    let confidence = value.get("confidence").and_then(|v| v.as_i64()).unwrap_or(0);
    let rationale = value
        .get("rationale")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    Some((validation, confidence, rationale))
}
