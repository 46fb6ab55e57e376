//! Executor graph nodes.
//!
//! Every node reads the state, does its work through the injected
//! [`GraphServices`], and returns a [`StateUpdate`]. Nodes never touch the
//! state directly and never route; routing belongs to [`crate::router`].

pub mod end;
pub mod human;
pub mod planner;
pub mod reasoning;
pub mod tools;
pub mod validator;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use snak_config::GraphConfig;
use snak_core::event::{EventKind, GraphEvent};
use snak_core::message::Message;
use snak_core::model::{ChatModel, ModelRequest, ModelResponse, ModelSelector};
use snak_core::token::{HeuristicTokenizer, TokenEstimator, TokenTracker};
use snak_core::tool::ToolRegistry;
use snak_memory::ConversationMemory;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::error::GraphError;
use crate::state::{ExecutionState, NodeId, StateUpdate};

pub use end::EndGraphNode;
pub use human::HumanNode;
pub use planner::PlannerNode;
pub use reasoning::ReasoningNode;
pub use tools::ToolsNode;
pub use validator::ValidatorNode;

/// Sender half of an event stream.
pub type EventSender = mpsc::Sender<Result<GraphEvent, GraphError>>;

/// Collaborators shared by every node of a graph.
#[derive(Clone)]
pub struct GraphServices {
    pub selector: Arc<dyn ModelSelector>,
    pub tools: Arc<ToolRegistry>,
    pub memory: ConversationMemory,
    pub tokenizer: Arc<dyn TokenEstimator>,
    pub tracker: Arc<TokenTracker>,
    pub limits: GraphConfig,
}

impl GraphServices {
    pub fn new(selector: Arc<dyn ModelSelector>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            selector,
            tools,
            memory: ConversationMemory::disabled(),
            tokenizer: Arc::new(HeuristicTokenizer),
            tracker: Arc::new(TokenTracker::default()),
            limits: GraphConfig::default(),
        }
    }

    pub fn with_memory(mut self, memory: ConversationMemory) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn TokenEstimator>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<TokenTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_limits(mut self, limits: GraphConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.model_timeout_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.tool_timeout_ms)
    }
}

/// What a node sees besides the state.
pub struct RunContext<'a> {
    pub services: &'a GraphServices,
    pub config: &'a RunConfig,
    pub events: Option<&'a EventSender>,
}

impl<'a> RunContext<'a> {
    pub fn new(services: &'a GraphServices, config: &'a RunConfig) -> Self {
        Self {
            services,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<&'a EventSender>) -> Self {
        self.events = events;
        self
    }

    /// Forward an event to the stream consumer, if any.
    pub async fn emit(&self, event: GraphEvent) {
        if let Some(tx) = self.events {
            // A dropped receiver only means nobody is listening anymore.
            let _ = tx.send(Ok(event)).await;
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.config.cancellation
    }
}

/// One node of the executor graph.
#[async_trait]
pub trait GraphNode: Send + Sync {
    fn id(&self) -> NodeId;

    async fn run(
        &self,
        state: &ExecutionState,
        ctx: &RunContext<'_>,
    ) -> Result<StateUpdate, GraphError>;
}

/// Race `fut` against `budget` and the run's cancellation token.
///
/// The losing future is dropped, so a late completion can never reach the state.
pub(crate) async fn guarded<F, T>(
    cancel: &CancellationToken,
    budget: Duration,
    on_timeout: GraphError,
    fut: F,
) -> Result<T, GraphError>
where
    F: Future<Output = Result<T, GraphError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(GraphError::Cancelled),
        outcome = tokio::time::timeout(budget, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(on_timeout),
        },
    }
}

/// Invoke a model under the model timeout.
///
/// When someone is listening to the event stream the model is streamed
/// and every chunk is relayed; otherwise it is invoked in one shot.
pub(crate) async fn call_model(
    ctx: &RunContext<'_>,
    node: NodeId,
    model: &Arc<dyn ChatModel>,
    request: ModelRequest,
) -> Result<ModelResponse, GraphError> {
    let model_name = model.name().to_string();
    ctx.emit(
        GraphEvent::new(
            model_name.as_str(),
            EventKind::ChatModelStart,
            json!({ "messages": request.messages.len() }),
        )
        .with_metadata("node", node.as_str().into()),
    )
    .await;

    let budget = ctx.services.model_timeout();
    let timeout = GraphError::ModelTimeout {
        ms: ctx.services.limits.model_timeout_ms,
    };
    let response = guarded(
        ctx.cancellation(),
        budget,
        timeout,
        fetch_response(ctx, node, model, request),
    )
    .await?;

    ctx.emit(
        GraphEvent::new(
            model_name.as_str(),
            EventKind::ChatModelEnd,
            json!({
                "output": response.message.content,
                "tool_calls": response.message.tool_calls.len(),
            }),
        )
        .with_metadata("node", node.as_str().into()),
    )
    .await;
    Ok(response)
}

async fn fetch_response(
    ctx: &RunContext<'_>,
    node: NodeId,
    model: &Arc<dyn ChatModel>,
    request: ModelRequest,
) -> Result<ModelResponse, GraphError> {
    if ctx.events.is_none() {
        return Ok(model.invoke(request).await?);
    }

    let mut rx = model.stream(request).await?;
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut usage = None;
    while let Some(chunk) = rx.recv().await {
        let chunk = chunk?;
        if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
            ctx.emit(
                GraphEvent::new(model.name(), EventKind::ChatModelStream, json!({ "chunk": text }))
                    .with_metadata("node", node.as_str().into()),
            )
            .await;
            content.push_str(&text);
        }
        tool_calls.extend(chunk.tool_calls);
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }
        if chunk.done {
            break;
        }
    }
    Ok(ModelResponse {
        message: Message::assistant(content).with_tool_calls(tool_calls),
        usage,
        model: model.name().to_string(),
    })
}

/// Cut text to `max` characters for log lines.
pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}
