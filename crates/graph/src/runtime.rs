//! The executor graph runtime.
//!
//! Drives one run node by node: execute, merge the update, count the
//! transition, checkpoint, route. Node execution is strictly sequential;
//! the state is owned here for the whole run.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;
use snak_core::checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore, RunStatus};
use snak_core::error::CheckpointError;
use snak_core::event::{EventKind, GraphEvent};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::GraphError;
use crate::error_handler::handle_node_error;
use crate::nodes::{
    EndGraphNode, EventSender, GraphNode, GraphServices, HumanNode, PlannerNode, ReasoningNode,
    RunContext, ToolsNode, ValidatorNode,
};
use crate::router;
use crate::state::{ExecutionState, NodeId, Route};

/// Event name of the closing event of a streamed run.
pub const GRAPH_EVENT_NAME: &str = "executor_graph";

/// How a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GraphOutcome {
    Completed {
        state: ExecutionState,
    },
    /// Suspended at the human node; resume with the thread id
    Interrupted {
        state: ExecutionState,
        prompt: String,
        thread_id: String,
    },
}

impl GraphOutcome {
    pub fn state(&self) -> &ExecutionState {
        match self {
            Self::Completed { state } | Self::Interrupted { state, .. } => state,
        }
    }

    pub fn into_state(self) -> ExecutionState {
        match self {
            Self::Completed { state } | Self::Interrupted { state, .. } => state,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }

    /// Decode the closing event of [`ExecutorGraph::stream_events`].
    pub fn from_event(event: &GraphEvent) -> Option<Self> {
        if event.name != GRAPH_EVENT_NAME || event.event != EventKind::ChainEnd {
            return None;
        }
        serde_json::from_value(event.data.clone()).ok()
    }
}

/// What is persisted per thread.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    state: ExecutionState,
    /// The node the run stopped in front of
    next: Option<NodeId>,
}

fn node_for(id: NodeId) -> Option<&'static dyn GraphNode> {
    match id {
        NodeId::Planner => Some(&PlannerNode),
        NodeId::Reasoning => Some(&ReasoningNode),
        NodeId::Tools => Some(&ToolsNode),
        NodeId::Validator => Some(&ValidatorNode),
        NodeId::EndGraph => Some(&EndGraphNode),
        NodeId::Human => None,
    }
}

fn encode<T: Serialize>(thread_id: &str, value: &T) -> Result<serde_json::Value, GraphError> {
    serde_json::to_value(value).map_err(|e| {
        GraphError::Checkpoint(CheckpointError::Corrupt {
            thread_id: thread_id.to_string(),
            reason: e.to_string(),
        })
    })
}

/// The compiled executor graph.
#[derive(Clone)]
pub struct ExecutorGraph {
    services: Arc<GraphServices>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl ExecutorGraph {
    pub fn new(services: GraphServices) -> Self {
        Self {
            services: Arc::new(services),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
        }
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    pub fn services(&self) -> &GraphServices {
        &self.services
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Run to completion or to the next interrupt.
    pub async fn invoke(
        &self,
        state: ExecutionState,
        config: &RunConfig,
    ) -> Result<GraphOutcome, GraphError> {
        let entry = router::entry_node(&state, config);
        self.drive(state, entry, config, None).await
    }

    /// Continue a run suspended at the human node.
    pub async fn resume(
        &self,
        thread_id: &str,
        input: impl Into<String>,
        config: &RunConfig,
    ) -> Result<GraphOutcome, GraphError> {
        let config = config.clone().with_thread_id(thread_id);
        let (config, state, next) = self.prepare_resume(config, input.into()).await?;
        self.drive(state, next, &config, None).await
    }

    /// Run in the background, relaying events as they happen.
    ///
    /// The last item is either the `executor_graph` chain-end event carrying
    /// the [`GraphOutcome`], or the error that stopped the run.
    pub fn stream_events(
        &self,
        state: ExecutionState,
        config: RunConfig,
    ) -> mpsc::Receiver<Result<GraphEvent, GraphError>> {
        let (tx, rx) = mpsc::channel(128);
        let graph = self.clone();
        tokio::spawn(async move {
            let entry = router::entry_node(&state, &config);
            let result = graph.drive(state, entry, &config, Some(&tx)).await;
            graph.finish_stream(&tx, &config, result).await;
        });
        rx
    }

    /// [`Self::resume`] with the events of [`Self::stream_events`].
    pub fn stream_resume(
        &self,
        thread_id: &str,
        input: impl Into<String>,
        config: RunConfig,
    ) -> mpsc::Receiver<Result<GraphEvent, GraphError>> {
        let (tx, rx) = mpsc::channel(128);
        let graph = self.clone();
        let config = config.with_thread_id(thread_id);
        let input = input.into();
        tokio::spawn(async move {
            match graph.prepare_resume(config.clone(), input).await {
                Ok((config, state, next)) => {
                    let result = graph.drive(state, next, &config, Some(&tx)).await;
                    graph.finish_stream(&tx, &config, result).await;
                }
                Err(e) => graph.finish_stream(&tx, &config, Err(e)).await,
            }
        });
        rx
    }

    async fn finish_stream(
        &self,
        tx: &EventSender,
        config: &RunConfig,
        result: Result<GraphOutcome, GraphError>,
    ) {
        let item = result.and_then(|outcome| {
            Ok(
                GraphEvent::new(GRAPH_EVENT_NAME, EventKind::ChainEnd, encode(&config.thread_id, &outcome)?)
                    .with_metadata("thread_id", config.thread_id.clone().into()),
            )
        });
        if tx.send(item).await.is_err() {
            debug!(thread_id = %config.thread_id, "Event stream dropped before the run finished");
        }
    }

    /// Load a suspended run and feed it the human input. The resumed run
    /// keeps the request that started it.
    async fn prepare_resume(
        &self,
        mut config: RunConfig,
        input: String,
    ) -> Result<(RunConfig, ExecutionState, NodeId), GraphError> {
        let thread_id = config.thread_id.clone();
        let thread_id = thread_id.as_str();
        let checkpoint = self
            .checkpoints
            .get(thread_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(thread_id.to_string()))?;
        if !checkpoint.is_suspended() {
            return Err(GraphError::NotSuspended(thread_id.to_string()));
        }
        let snapshot: Snapshot = checkpoint.decode()?;
        if snapshot.next != Some(NodeId::Human) {
            return Err(GraphError::NotSuspended(thread_id.to_string()));
        }

        info!(thread_id, "Resuming suspended run");
        let mut state = snapshot.state;
        if let Some(request) = state.original_request() {
            config.user_request = request.to_string();
        }
        state.apply(HumanNode::resume(input));
        state.current_graph_step += 1;

        let next = match router::next_route(NodeId::Human, &state, &config, self.services.limits.max_retry) {
            Route::Node(node) => node,
            Route::End => NodeId::EndGraph,
        };
        self.save(thread_id, RunStatus::Running, &state, Some(next)).await?;
        Ok((config, state, next))
    }

    async fn save(
        &self,
        thread_id: &str,
        status: RunStatus,
        state: &ExecutionState,
        next: Option<NodeId>,
    ) -> Result<(), GraphError> {
        let snapshot = Snapshot {
            state: state.clone(),
            next,
        };
        let value = encode(thread_id, &snapshot)?;
        self.checkpoints
            .put(Checkpoint::new(thread_id, status, value))
            .await?;
        Ok(())
    }

    /// Drop the checkpoint of a run that can no longer be resumed.
    async fn discard(&self, thread_id: &str) {
        if let Err(e) = self.checkpoints.delete(thread_id).await {
            warn!(thread_id, "Failed to drop finished checkpoint: {e}");
        }
    }

    /// Run nodes until the graph ends, fails or suspends. Only a suspended
    /// run keeps its checkpoint.
    async fn drive(
        &self,
        state: ExecutionState,
        next: NodeId,
        config: &RunConfig,
        events: Option<&EventSender>,
    ) -> Result<GraphOutcome, GraphError> {
        let result = self.run_nodes(state, next, config, events).await;
        if !matches!(result, Ok(GraphOutcome::Interrupted { .. })) {
            self.discard(&config.thread_id).await;
        }
        result
    }

    async fn run_nodes(
        &self,
        mut state: ExecutionState,
        mut next: NodeId,
        config: &RunConfig,
        events: Option<&EventSender>,
    ) -> Result<GraphOutcome, GraphError> {
        let services = self.services.as_ref();
        let ctx = RunContext::new(services, config).with_events(events);
        let max_retry = services.limits.max_retry;
        let limit = config.recursion_limit.unwrap_or(services.limits.recursion_limit);
        let thread_id = config.thread_id.as_str();
        let mut executed = 0u32;

        info!(
            thread_id,
            entry = %next,
            mode = %config.mode(),
            execution_mode = %config.execution_mode,
            "Executor graph run starting"
        );

        loop {
            if config.cancellation.is_cancelled() {
                warn!(thread_id, "Run cancelled");
                return Err(GraphError::Cancelled);
            }

            let Some(node) = node_for(next) else {
                let prompt = HumanNode::prompt(&state);
                self.save(
                    thread_id,
                    RunStatus::AwaitingInput {
                        prompt: prompt.clone(),
                    },
                    &state,
                    Some(NodeId::Human),
                )
                .await?;
                info!(thread_id, "Run suspended awaiting human input");
                return Ok(GraphOutcome::Interrupted {
                    state,
                    prompt,
                    thread_id: thread_id.to_string(),
                });
            };

            if executed >= limit {
                error!(thread_id, limit, "Recursion limit reached");
                return Err(GraphError::RecursionLimit(limit));
            }
            executed += 1;

            ctx.emit(
                GraphEvent::new(
                    next.as_str(),
                    EventKind::ChainStart,
                    json!({ "graph_step": state.current_graph_step }),
                )
                .with_metadata("thread_id", thread_id.into()),
            )
            .await;

            let started = Instant::now();
            let update = match node.run(&state, &ctx).await {
                Ok(update) => update,
                Err(e) if e.is_handled() => handle_node_error(next, &e, &state, max_retry),
                Err(e) => {
                    error!(thread_id, node = %next, "Node failed: {e}");
                    return Err(e);
                }
            };
            let produced = update.messages.len();
            state.apply(update);
            state.current_graph_step += 1;
            debug!(
                node = %next,
                graph_step = state.current_graph_step,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Node finished"
            );

            ctx.emit(
                GraphEvent::new(
                    next.as_str(),
                    EventKind::ChainEnd,
                    json!({
                        "graph_step": state.current_graph_step,
                        "messages": produced,
                        "output": state.last_message().map(|m| m.content.as_str()),
                    }),
                )
                .with_metadata("thread_id", thread_id.into()),
            )
            .await;

            match router::next_route(next, &state, config, max_retry) {
                Route::End => {
                    info!(
                        thread_id,
                        graph_steps = state.current_graph_step,
                        "Executor graph run complete"
                    );
                    return Ok(GraphOutcome::Completed { state });
                }
                Route::Node(following) => {
                    self.save(thread_id, RunStatus::Running, &state, Some(following))
                        .await?;
                    next = following;
                }
            }
        }
    }
}
