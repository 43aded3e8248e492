// Intent classification: one completion with tool-calling disabled routes a
// query to the conversational branch or the RCA investigation branch.

use crate::engines::llm::types::{LlmConfig, LlmMessage, LlmRequest};
use crate::engines::llm::LlmHandler;
use crate::types::RcaState;
use std::sync::Arc;
use tracing::{debug, warn};

/// The single intent that routes to the investigation branch. Anything else
/// is conversational, so new conversational sub-intents need no code change.
pub const RCA_INVESTIGATION: &str = "rca_investigation";

/// Most recent thread messages included for context. A bare "check again"
/// is ambiguous without them.
const HISTORY_WINDOW: usize = 6;
const HISTORY_CHAR_LIMIT: usize = 2000;

pub struct IntentClassifier {
    llm: Arc<LlmHandler>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<LlmHandler>) -> Self {
        Self { llm }
    }

    /// Classify the query. Any LLM or parsing failure defaults to
    /// `rca_investigation`: fail toward the more thorough path.
    pub async fn classify(&self, state: &RcaState) -> String {
        let mut prompt = String::new();
        let history = &state.execution_context.thread_history;
        if !history.is_empty() {
            let mut slice = String::new();
            for message in history.iter().rev().take(HISTORY_WINDOW).rev() {
                slice.push_str(&format!("{}: {}\n", message.role, message.content));
            }
            let slice: String = slice.chars().take(HISTORY_CHAR_LIMIT).collect();
            prompt.push_str("Conversation so far:\n");
            prompt.push_str(&slice);
            prompt.push('\n');
        }
        prompt.push_str(&format!("User query: {}\n", state.task));
        prompt.push_str(
            "Classify the intent of the query. Respond with exactly one word:\n\
             - rca_investigation: the user wants an incident investigated or re-investigated\n\
             - question: the user asks about a previous answer or general topic\n\
             - smalltalk: greeting or chit-chat\n",
        );

        let request = LlmRequest::completion(
            vec![
                LlmMessage::system("You are an intent router for an incident analysis assistant."),
                LlmMessage::user(prompt),
            ],
            LlmConfig {
                temperature: 0.0,
                max_tokens: 16,
                ..Default::default()
            },
        );

        match self.llm.complete(request).await {
            Ok(response) => {
                let intent = response
                    .content
                    .trim()
                    .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                    .to_lowercase();
                if intent.is_empty() {
                    warn!("empty intent classification, defaulting to investigation");
                    return RCA_INVESTIGATION.to_string();
                }
                debug!(intent = %intent, "classified query intent");
                intent
            }
            Err(e) => {
                warn!(error = %e, "intent classification failed, defaulting to investigation");
                RCA_INVESTIGATION.to_string()
            }
        }
    }
}

/// Allow-list-of-one routing rule.
pub fn routes_to_investigation(intent: &str) -> bool {
    intent == RCA_INVESTIGATION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::llm::providers::scripted::{ScriptedProvider, ScriptedResponse};
    use crate::engines::llm::{LlmHandler, LlmHandlerConfig};
    use crate::types::{ExecutionContext, ThreadMessage};

    async fn classifier(provider: ScriptedProvider) -> IntentClassifier {
        let handler = LlmHandler::new(LlmHandlerConfig {
            max_retries: 0,
            ..Default::default()
        });
        handler.register_provider(Arc::new(provider)).await;
        IntentClassifier::new(Arc::new(handler))
    }

    fn state_with_history(task: &str, history: Vec<ThreadMessage>) -> RcaState {
        let ctx = ExecutionContext::new("ws-1").with_thread_history(history);
        RcaState::new(task, 2, ctx)
    }

    #[tokio::test]
    async fn classification_is_trimmed_and_lowercased() {
        let classifier = classifier(ScriptedProvider::with_contents(vec!["  Question.\n"])).await;
        let state = state_with_history("what did you find earlier?", Vec::new());
        assert_eq!(classifier.classify(&state).await, "question");
    }

    #[tokio::test]
    async fn llm_failure_defaults_to_investigation() {
        let classifier = classifier(ScriptedProvider::new(vec![ScriptedResponse::Failure(
            "rate limited".to_string(),
        )]))
        .await;
        let state = state_with_history("checkout is down", Vec::new());
        assert_eq!(classifier.classify(&state).await, RCA_INVESTIGATION);
    }

    #[tokio::test]
    async fn history_is_included_in_the_prompt() {
        let provider = Arc::new(ScriptedProvider::with_contents(vec!["rca_investigation"]));
        let handler = LlmHandler::new(LlmHandlerConfig::default());
        handler.register_provider(provider.clone()).await;
        let classifier = IntentClassifier::new(Arc::new(handler));

        let history = vec![ThreadMessage {
            role: "user".to_string(),
            content: "the api was timing out yesterday".to_string(),
        }];
        let state = state_with_history("check again", history);
        let _ = classifier.classify(&state).await;

        let requests = provider.recorded_requests();
        assert!(requests[0].messages[1].content.contains("timing out yesterday"));
        // Tool calling is disabled for classification
        assert!(requests[0].tools.is_none());
    }

    #[test]
    fn only_the_literal_intent_routes_to_investigation() {
        assert!(routes_to_investigation("rca_investigation"));
        assert!(!routes_to_investigation("rca"));
        assert!(!routes_to_investigation("question"));
        assert!(!routes_to_investigation("anything_else"));
    }
}
