use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::engines::llm::types::*;
use crate::engines::llm::LlmProvider;
use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError, FaultlineResult};

/// OpenAI chat-completions provider with function calling and comprehensive
/// error handling.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    default_model: String,
    timeout_seconds: u64,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetails,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetails {
    message: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> FaultlineResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|_| {
                FaultlineError::new(
                    ErrorCode::LLMAuthentication,
                    ErrorCategory::LLM,
                    ErrorSeverity::Critical,
                    "Invalid API key format",
                )
            })?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| {
                FaultlineError::new(
                    ErrorCode::NetworkError,
                    ErrorCategory::LLM,
                    ErrorSeverity::Critical,
                    &format!("Failed to create HTTP client: {}", e),
                )
            })?;

        Ok(Self {
            client,
            base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            timeout_seconds: 60,
        })
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.default_model = model;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn convert_request(&self, request: &LlmRequest) -> OpenAiRequest {
        let messages = request
            .messages
            .iter()
            .map(|msg| OpenAiMessage {
                role: msg.role.clone(),
                content: Some(msg.content.clone()),
                tool_calls: msg.tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .map(|call| OpenAiToolCall {
                            id: call.id.clone(),
                            call_type: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: msg.tool_call_id.clone(),
            })
            .collect();

        let tools = request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|tool| OpenAiTool {
                    tool_type: "function".to_string(),
                    function: OpenAiFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect()
        });

        // tool_choice is only meaningful alongside a tool list
        let tool_choice = if tools.is_some() {
            request.tool_choice.as_ref().map(|choice| match choice {
                ToolChoice::None => json!("none"),
                ToolChoice::Auto => json!("auto"),
                ToolChoice::Required => json!("required"),
            })
        } else {
            None
        };

        OpenAiRequest {
            model: request
                .config
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages,
            temperature: request.config.temperature,
            max_tokens: Some(request.config.max_tokens),
            tools,
            tool_choice,
        }
    }

    fn convert_response(&self, response: OpenAiResponse) -> FaultlineResult<LlmResponse> {
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            FaultlineError::new(
                ErrorCode::LLMInvalidResponse,
                ErrorCategory::LLM,
                ErrorSeverity::High,
                "No choices in OpenAI response",
            )
        })?;

        let tool_calls = choice.message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect()
        });

        let usage = response.usage.map(|u| TokenUsage {
            prompt: u.prompt_tokens,
            completion: u.completion_tokens,
            total: u.total_tokens,
        });

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            model: response.model,
            provider: "openai".to_string(),
            token_usage: usage,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            tool_calls,
        })
    }

    fn handle_api_error(&self, status: u16, body: &str) -> FaultlineError {
        let detail = serde_json::from_str::<OpenAiError>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.to_string());

        let (code, severity) = match status {
            400 => (ErrorCode::LLMInvalidRequest, ErrorSeverity::Medium),
            401 => (ErrorCode::LLMAuthentication, ErrorSeverity::Critical),
            429 => (ErrorCode::LLMRateLimited, ErrorSeverity::Medium),
            500..=599 => (ErrorCode::LLMApiError, ErrorSeverity::High),
            _ => (ErrorCode::LLMError, ErrorSeverity::Medium),
        };

        FaultlineError::new(
            code,
            ErrorCategory::LLM,
            severity,
            &format!("OpenAI API error ({}): {}", status, detail),
        )
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn complete(&self, request: LlmRequest) -> FaultlineResult<LlmResponse> {
        let openai_request = self.convert_request(&request);

        let response = match tokio::time::timeout(
            Duration::from_secs(self.timeout_seconds),
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .json(&openai_request)
                .send(),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(FaultlineError::new(
                    ErrorCode::LLMApiError,
                    ErrorCategory::LLM,
                    ErrorSeverity::High,
                    &format!("OpenAI request failed: {}", e),
                ))
            }
            Err(_) => {
                return Err(FaultlineError::new(
                    ErrorCode::LLMTimeout,
                    ErrorCategory::LLM,
                    ErrorSeverity::High,
                    &format!("OpenAI request timeout after {} seconds", self.timeout_seconds),
                ))
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(self.handle_api_error(status, &body));
        }

        let openai_response: OpenAiResponse = response.json().await.map_err(|e| {
            FaultlineError::new(
                ErrorCode::LLMInvalidResponse,
                ErrorCategory::LLM,
                ErrorSeverity::High,
                &format!("Failed to parse OpenAI response: {}", e),
            )
        })?;

        self.convert_response(openai_response)
    }

    async fn health_check(&self) -> FaultlineResult<bool> {
        let test_request = json!({
            "model": self.default_model,
            "messages": [{"role": "user", "content": "test"}],
            "max_tokens": 1
        });

        match tokio::time::timeout(
            Duration::from_secs(self.timeout_seconds),
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .json(&test_request)
                .send(),
        )
        .await
        {
            Ok(Ok(response)) => Ok(response.status().is_success()),
            Ok(Err(_)) => Ok(false),
            Err(_) => Ok(false),
        }
    }
}
