//! Shared test helpers for graph tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use snak_core::error::{ModelError, ToolError};
use snak_core::message::{Message, MessageToolCall};
use snak_core::model::{ChatModel, ModelRequest, ModelResponse, ModelSelector, ModelTier, SelectedModel, Usage};
use snak_core::tool::{Tool, ToolOutput, ToolRegistry};

use crate::nodes::GraphServices;

/// One scripted model reply.
pub enum Reply {
    Message(Message),
    Error(ModelError),
    /// Never resolves
    Hang,
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Self::Message(Message::assistant(text))
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::Message(Message::assistant(value.to_string()))
    }

    pub fn tool_calls(thought: &str, calls: Vec<MessageToolCall>) -> Self {
        Self::Message(Message::assistant(thought).with_tool_calls(calls))
    }
}

/// A mock model that returns a sequence of scripted replies.
///
/// Panics if more calls are made than replies provided.
pub struct SequentialMockModel {
    name: String,
    replies: Mutex<VecDeque<Reply>>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<ModelRequest>>,
}

impl SequentialMockModel {
    pub fn new(name: &str, replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            replies: Mutex::new(replies.into()),
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for SequentialMockModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Message(message)) => Ok(ModelResponse {
                message,
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                model: self.name.clone(),
            }),
            Some(Reply::Error(err)) => Err(err),
            Some(Reply::Hang) => std::future::pending().await,
            None => panic!("SequentialMockModel {}: no more replies (call #{call})", self.name),
        }
    }
}

/// A selector that sends every piece of text to `smart`.
pub struct MockSelector {
    pub fast: Arc<SequentialMockModel>,
    pub smart: Arc<SequentialMockModel>,
    select_calls: AtomicUsize,
}

impl MockSelector {
    pub fn new(fast: Arc<SequentialMockModel>, smart: Arc<SequentialMockModel>) -> Arc<Self> {
        Arc::new(Self {
            fast,
            smart,
            select_calls: AtomicUsize::new(0),
        })
    }

    pub fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelSelector for MockSelector {
    async fn select_model_for_messages(&self, _text: &str) -> Result<SelectedModel, ModelError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SelectedModel {
            model: self.smart.clone(),
            model_name: self.smart.name().to_string(),
            tier: ModelTier::Smart,
        })
    }

    fn model(&self, tier: ModelTier) -> Option<Arc<dyn ChatModel>> {
        match tier {
            ModelTier::Fast => Some(self.fast.clone()),
            ModelTier::Smart => Some(self.smart.clone()),
            ModelTier::Cheap => None,
        }
    }
}

/// A tool that returns a fixed output, optionally after a delay.
pub struct StaticTool {
    pub name: &'static str,
    pub output: String,
    pub delay: Option<Duration>,
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Returns a fixed value"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ToolOutput::Text(self.output.clone()))
    }
}

/// A tool that always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "transfer"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "transfer".into(),
            reason: "insufficient funds".into(),
        })
    }
}

pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

pub fn registry(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    Arc::new(registry)
}

pub fn balance_tool() -> Arc<dyn Tool> {
    Arc::new(StaticTool {
        name: "get_balance",
        output: "42 STRK".into(),
        delay: None,
    })
}

pub fn services(selector: Arc<MockSelector>, tools: Arc<ToolRegistry>) -> GraphServices {
    GraphServices::new(selector, tools)
}
