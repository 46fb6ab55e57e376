//! Model traits: the abstraction over language-model backends.
//!
//! A [`ChatModel`] turns a list of messages into an assistant message,
//! optionally with tool calls. A [`ModelSelector`] owns a set of models in
//! capability tiers and picks one for a given piece of text.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::message::{Message, MessageToolCall};

/// A request to a chat model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The prompt messages
    pub messages: Vec<Message>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ModelRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub message: Message,
    pub usage: Option<Usage>,
    /// Which model actually responded
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The core chat model trait.
///
/// Every backend implements `invoke`; streaming and structured output have
/// default implementations built on top of it.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// The model name as reported to logs and events.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `invoke()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ModelError>>, ModelError> {
        let response = self.invoke(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.message.content),
                tool_calls: response.message.tool_calls,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Ask for a JSON object matching `schema`.
    ///
    /// Default implementation appends the schema as an instruction and
    /// extracts the first JSON object from the reply.
    async fn invoke_structured(
        &self,
        mut request: ModelRequest,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, ModelError> {
        request.tools.clear();
        request.messages.push(Message::system(format!(
            "Respond with a single JSON object matching this JSON Schema and nothing else:\n{schema}"
        )));
        let response = self.invoke(request).await?;
        extract_json_object(&response.message.content)
    }
}

/// A model paired with the tools it may call.
#[derive(Clone)]
pub struct BoundModel {
    model: Arc<dyn ChatModel>,
    tools: Vec<ToolDefinition>,
}

impl BoundModel {
    pub fn new(model: Arc<dyn ChatModel>, tools: Vec<ToolDefinition>) -> Self {
        Self { model, tools }
    }

    pub fn name(&self) -> &str {
        self.model.name()
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn request(&self, messages: Vec<Message>) -> ModelRequest {
        ModelRequest::new(messages).with_tools(self.tools.clone())
    }

    pub fn inner(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }
}

/// Bind a tool list to a model.
pub fn bind_tools(model: Arc<dyn ChatModel>, tools: Vec<ToolDefinition>) -> BoundModel {
    BoundModel::new(model, tools)
}

/// Pull the first balanced JSON object out of free text.
pub fn extract_json_object(text: &str) -> Result<serde_json::Value, ModelError> {
    let start = text
        .find('{')
        .ok_or_else(|| ModelError::InvalidStructuredOutput("no JSON object in reply".into()))?;
    let end = text
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| ModelError::InvalidStructuredOutput("unterminated JSON object".into()))?;
    serde_json::from_str(&text[start..=end])
        .map_err(|e| ModelError::InvalidStructuredOutput(e.to_string()))
}

/// Capability tier of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Low latency; used for tool-calling turns and validation
    Fast,
    /// Higher capability; used for planning and complex steps
    Smart,
    /// Cheapest available; used for trivial turns
    Cheap,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Smart => write!(f, "smart"),
            Self::Cheap => write!(f, "cheap"),
        }
    }
}

/// The model chosen for a piece of text.
#[derive(Clone)]
pub struct SelectedModel {
    pub model: Arc<dyn ChatModel>,
    pub model_name: String,
    pub tier: ModelTier,
}

/// Chooses a model for a request.
#[async_trait]
pub trait ModelSelector: Send + Sync {
    /// Pick the most appropriate model for `text`.
    ///
    /// Returns [`ModelError::ModelNotFound`] when the chosen tier is not configured.
    async fn select_model_for_messages(&self, text: &str) -> Result<SelectedModel, ModelError>;

    /// Direct access to a tier.
    fn model(&self, tier: ModelTier) -> Option<Arc<dyn ChatModel>>;
}
