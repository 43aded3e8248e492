//! Scripted in-memory provider for tests. Plays back a fixed sequence of
//! responses and records every request it saw.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::engines::llm::types::*;
use crate::engines::llm::LlmProvider;
use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError, FaultlineResult};

#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Content(String),
    ToolCalls(Vec<ToolCall>),
    Failure(String),
}

pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedResponse>>,
    /// Played when the script runs dry; keeps variable-length loops simple.
    fallback: Option<ScriptedResponse>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ScriptedResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_contents(contents: Vec<&str>) -> Self {
        Self::new(
            contents
                .into_iter()
                .map(|c| ScriptedResponse::Content(c.to_string()))
                .collect(),
        )
    }

    pub fn repeating(content: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(ScriptedResponse::Content(content.to_string())),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, content: &str) -> Self {
        self.fallback = Some(ScriptedResponse::Content(content.to_string()));
        self
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn complete(&self, request: LlmRequest) -> FaultlineResult<LlmResponse> {
        self.requests.lock().unwrap().push(request);

        let next = {
            let mut script = self.script.lock().unwrap();
            script.pop_front().or_else(|| self.fallback.clone())
        };

        let next = next.ok_or_else(|| {
            FaultlineError::new(
                ErrorCode::LLMInvalidResponse,
                ErrorCategory::LLM,
                ErrorSeverity::High,
                "Scripted provider exhausted",
            )
        })?;

        let response = match next {
            ScriptedResponse::Content(content) => LlmResponse {
                content,
                model: "scripted".to_string(),
                provider: "scripted".to_string(),
                token_usage: None,
                finish_reason: "stop".to_string(),
                tool_calls: None,
            },
            ScriptedResponse::ToolCalls(calls) => LlmResponse {
                content: String::new(),
                model: "scripted".to_string(),
                provider: "scripted".to_string(),
                token_usage: None,
                finish_reason: "tool_calls".to_string(),
                tool_calls: Some(calls),
            },
            ScriptedResponse::Failure(message) => {
                return Err(FaultlineError::new(
                    ErrorCode::LLMApiError,
                    ErrorCategory::LLM,
                    ErrorSeverity::Medium,
                    &message,
                ))
            }
        };

        Ok(response)
    }

    async fn health_check(&self) -> FaultlineResult<bool> {
        Ok(true)
    }
}
