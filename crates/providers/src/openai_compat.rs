//! OpenAI-compatible chat model.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Fireworks AI,
//! and any endpoint exposing `/v1/chat/completions`.
//!
//! Supports:
//! - Chat completions with tool use / function calling
//! - Structured output via `response_format: json_object`

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snak_core::error::ModelError;
use snak_core::message::{Message, MessageToolCall, Role};
use snak_core::model::{
    ChatModel, ModelRequest, ModelResponse, ToolDefinition, Usage, extract_json_object,
};
use tracing::{debug, warn};

/// A shared HTTP endpoint that hands out per-model handles.
#[derive(Clone)]
pub struct OpenAiEndpoint {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiEndpoint {
    /// Create a new endpoint.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ModelError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// OpenRouter (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Result<Self, ModelError> {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// OpenAI (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ModelError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A chat model on this endpoint.
    pub fn model(&self, model: impl Into<String>) -> OpenAiCompatModel {
        OpenAiCompatModel {
            endpoint: self.clone(),
            model: model.into(),
            max_tokens: None,
        }
    }
}

/// One model served by an OpenAI-compatible endpoint.
pub struct OpenAiCompatModel {
    endpoint: OpenAiEndpoint,
    model: String,
    max_tokens: Option<u32>,
}

impl OpenAiCompatModel {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(&self, request: &ModelRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    async fn post(&self, body: serde_json::Value) -> Result<ModelResponse, ModelError> {
        let url = format!("{}/chat/completions", self.endpoint.base_url);

        debug!(provider = %self.endpoint.name, model = %self.model, "Sending completion request");

        let response = self
            .endpoint
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ModelError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ModelError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            return Err(ModelError::ModelNotFound(self.model.clone()));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ModelError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ModelError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        Self::into_model_response(api_response)
    }

    fn into_model_response(api_response: ApiResponse) -> Result<ModelResponse, ModelError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let tool_calls: Vec<MessageToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let message = Message::assistant(choice.message.content.unwrap_or_default())
            .with_tool_calls(tool_calls);

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ModelResponse {
            message,
            usage,
            model: api_response.model,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = self.request_body(&request);
        self.post(body).await
    }

    async fn invoke_structured(
        &self,
        mut request: ModelRequest,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, ModelError> {
        request.tools.clear();
        request.messages.push(Message::system(format!(
            "Respond with a JSON object matching this JSON Schema:\n{schema}"
        )));

        let mut body = self.request_body(&request);
        body["response_format"] = serde_json::json!({ "type": "json_object" });

        let response = self.post(body).await?;
        serde_json::from_str(&response.message.content)
            .or_else(|_| extract_json_object(&response.message.content))
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
