//! The agent wrapper: one executor graph per agent, driven in the mode the
//! agent is configured for.
//!
//! ```text
//!              ┌───────────────┐
//!   execute ──▶│   SnakAgent   │──▶ AgentResponse
//!              │  (init once)  │
//!              └──────┬────────┘
//!                     │ one of
//!     ┌───────────────┼────────────────┐
//!     ▼               ▼                ▼
//! interactive     autonomous        hybrid
//! (fresh thread)  (own thread,      (interrupt at the human
//!                  recursion cap)    node, resume_hybrid)
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use snak_config::AppConfig;
use snak_core::agent::{AgentConfig, AgentMode};
use snak_core::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use snak_core::event::GraphEvent;
use snak_core::message::{Message, last_ai_content};
use snak_core::model::ModelSelector;
use snak_core::token::TokenTotals;
use snak_core::tool::ToolRegistry;
use snak_graph::{ExecutionState, ExecutorGraph, GraphError, GraphOutcome, GraphServices, RunConfig};
use snak_memory::ConversationMemory;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::stream_event::AgentStreamEvent;

/// Node executions allowed per autonomous iteration (reasoning, tools,
/// validator, plus one for planning or the end node).
const NODES_PER_ITERATION: u32 = 4;

/// Graph-level recursion cap for an autonomous run.
pub fn autonomous_recursion_limit(max_iterations: u32) -> u32 {
    max_iterations.saturating_mul(NODES_PER_ITERATION)
}

/// The result of one blocking run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Checkpoint key of the run; pass it to `resume_hybrid` after an interrupt
    pub thread_id: String,
    /// The last non-empty assistant content, or the interrupt prompt
    pub response: String,
    pub interrupted: bool,
    pub graph_steps: u32,
    pub usage: TokenTotals,
}

enum Executor {
    Interactive(ExecutorGraph),
    Autonomous(ExecutorGraph),
    Hybrid(ExecutorGraph),
}

impl Executor {
    fn graph(&self) -> &ExecutorGraph {
        match self {
            Self::Interactive(graph) | Self::Autonomous(graph) | Self::Hybrid(graph) => graph,
        }
    }
}

/// One configured agent.
///
/// Build with [`SnakAgent::new`], call [`SnakAgent::init`] once, then
/// `execute` as often as needed.
pub struct SnakAgent {
    config: AgentConfig,
    services: GraphServices,
    checkpoints: Arc<dyn CheckpointStore>,
    executor: Option<Executor>,
    cancellation: Mutex<CancellationToken>,
}

impl SnakAgent {
    pub fn new(config: AgentConfig, services: GraphServices) -> Self {
        Self {
            config,
            services,
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            executor: None,
            cancellation: Mutex::new(CancellationToken::new()),
        }
    }

    /// Wire an agent from the application config.
    pub fn from_app_config(
        app: &AppConfig,
        selector: Arc<dyn ModelSelector>,
        tools: Arc<ToolRegistry>,
        memory: ConversationMemory,
    ) -> Self {
        let services = GraphServices::new(selector, tools)
            .with_memory(memory)
            .with_limits(app.graph.clone());
        Self::new(app.agent.clone(), services)
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn mode(&self) -> AgentMode {
        self.config.mode
    }

    pub fn is_initialized(&self) -> bool {
        self.executor.is_some()
    }

    /// Build the executor for the configured mode.
    pub fn init(&mut self) -> Result<(), AgentError> {
        if self.config.id.trim().is_empty() {
            return Err(AgentError::InvalidConfig("agent id must not be empty".into()));
        }
        if self.config.max_iterations == 0 {
            return Err(AgentError::InvalidConfig("max_iterations must be at least 1".into()));
        }
        if self.config.max_graph_steps == 0 {
            return Err(AgentError::InvalidConfig("max_graph_steps must be at least 1".into()));
        }

        let graph = ExecutorGraph::new(self.services.clone()).with_checkpoints(self.checkpoints.clone());
        self.executor = Some(match self.config.mode {
            AgentMode::Interactive => Executor::Interactive(graph),
            AgentMode::Autonomous => Executor::Autonomous(graph),
            AgentMode::Hybrid => Executor::Hybrid(graph),
        });
        info!(
            agent = %self.config.id,
            mode = %self.config.mode,
            execution_mode = %self.config.execution_mode,
            memory = self.services.memory.backend_name(),
            "Agent initialized"
        );
        Ok(())
    }

    /// Run once to completion, or to the next interrupt in hybrid mode.
    pub async fn execute(&self, input: &str) -> Result<AgentResponse, AgentError> {
        let executor = self.executor()?;
        let config = self.run_config(executor, input);
        let state = ExecutionState::new(config.execution_mode, vec![Message::user(input)]);
        debug!(agent = %self.config.id, thread_id = %config.thread_id, "Executing");

        let outcome = executor.graph().invoke(state, &config).await?;
        Ok(self.finish(input, &config.thread_id, outcome).await)
    }

    /// Run in the background, relaying model and node events.
    ///
    /// The stream always closes with exactly one `final` or `error` event.
    pub fn execute_stream(&self, input: &str) -> Result<mpsc::Receiver<AgentStreamEvent>, AgentError> {
        let executor = self.executor()?;
        let config = self.run_config(executor, input);
        let state = ExecutionState::new(config.execution_mode, vec![Message::user(input)]);
        let thread_id = config.thread_id.clone();
        let events = executor.graph().stream_events(state, config);
        Ok(self.relay(events, input.to_string(), thread_id))
    }

    /// Continue a hybrid run suspended at the human node.
    ///
    /// The run keeps the request it was started with; `input` only answers
    /// the pending question.
    pub async fn resume_hybrid(&self, thread_id: &str, input: &str) -> Result<AgentResponse, AgentError> {
        let graph = self.hybrid_graph()?;
        let config = RunConfig::new(self.config.clone(), input)
            .with_thread_id(thread_id)
            .with_cancellation(self.cancellation_token());
        info!(agent = %self.config.id, thread_id, "Resuming hybrid run");

        let outcome = graph.resume(thread_id, input, &config).await?;
        Ok(self.finish(input, thread_id, outcome).await)
    }

    /// [`Self::resume_hybrid`] with the events of [`Self::execute_stream`].
    pub fn resume_hybrid_stream(
        &self,
        thread_id: &str,
        input: &str,
    ) -> Result<mpsc::Receiver<AgentStreamEvent>, AgentError> {
        let graph = self.hybrid_graph()?;
        let config = RunConfig::new(self.config.clone(), input)
            .with_cancellation(self.cancellation_token());
        let events = graph.stream_resume(thread_id, input, config);
        Ok(self.relay(events, input.to_string(), thread_id.to_string()))
    }

    /// Cancel the run in flight. Later runs get a fresh token.
    pub fn stop(&self) {
        let mut token = lock(&self.cancellation);
        token.cancel();
        *token = CancellationToken::new();
        info!(agent = %self.config.id, "Agent stopped");
    }

    /// Usage accumulated by every run of this agent.
    pub fn usage(&self) -> TokenTotals {
        self.services.tracker.totals()
    }

    fn executor(&self) -> Result<&Executor, AgentError> {
        self.executor
            .as_ref()
            .ok_or_else(|| AgentError::NotInitialized(self.config.id.clone()))
    }

    fn hybrid_graph(&self) -> Result<&ExecutorGraph, AgentError> {
        match self.executor()? {
            Executor::Hybrid(graph) => Ok(graph),
            _ => Err(AgentError::NotHybrid {
                agent: self.config.id.clone(),
                mode: self.config.mode,
            }),
        }
    }

    fn run_config(&self, executor: &Executor, input: &str) -> RunConfig {
        let config =
            RunConfig::new(self.config.clone(), input).with_cancellation(self.cancellation_token());
        match executor {
            Executor::Autonomous(_) => config
                .with_thread_id(format!("autonomous-{}", self.config.id))
                .with_recursion_limit(autonomous_recursion_limit(self.config.max_iterations)),
            Executor::Interactive(_) | Executor::Hybrid(_) => config,
        }
    }

    fn cancellation_token(&self) -> CancellationToken {
        lock(&self.cancellation).clone()
    }

    /// `fallback` is recorded as the question when the state has no
    /// original request.
    async fn finish(&self, fallback: &str, thread_id: &str, outcome: GraphOutcome) -> AgentResponse {
        let response = match &outcome {
            GraphOutcome::Interrupted { prompt, .. } => {
                info!(agent = %self.config.id, thread_id, "Run interrupted for human input");
                AgentResponse {
                    thread_id: thread_id.to_string(),
                    response: prompt.clone(),
                    interrupted: true,
                    graph_steps: outcome.state().current_graph_step,
                    usage: self.usage(),
                }
            }
            GraphOutcome::Completed { state } => {
                let request = state.original_request().unwrap_or(fallback);
                let answer = last_ai_content(&state.messages).unwrap_or_default().to_string();
                record_iteration(&self.services.memory, &self.config.id, request, &answer).await;
                AgentResponse {
                    thread_id: thread_id.to_string(),
                    response: answer,
                    interrupted: false,
                    graph_steps: state.current_graph_step,
                    usage: self.usage(),
                }
            }
        };
        debug!(
            agent = %self.config.id,
            graph_steps = response.graph_steps,
            interrupted = response.interrupted,
            "Run finished"
        );
        response
    }

    fn relay(
        &self,
        mut events: mpsc::Receiver<Result<GraphEvent, GraphError>>,
        fallback: String,
        thread_id: String,
    ) -> mpsc::Receiver<AgentStreamEvent> {
        let (tx, rx) = mpsc::channel(128);
        let memory = self.services.memory.clone();
        let tracker = self.services.tracker.clone();
        let agent_id = self.config.id.clone();

        tokio::spawn(async move {
            let mut closing = None;
            while let Some(item) = events.recv().await {
                let event = match item {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(agent = %agent_id, "Streamed run failed: {e}");
                        closing = Some(Err(e));
                        break;
                    }
                };
                if let Some(outcome) = GraphOutcome::from_event(&event) {
                    closing = Some(Ok(outcome));
                    break;
                }
                if let Some(mapped) = AgentStreamEvent::from_graph_event(&event)
                    && tx.send(mapped).await.is_err()
                {
                    return;
                }
            }

            let last = match closing {
                Some(Ok(GraphOutcome::Interrupted { state, prompt, .. })) => {
                    let interrupted = AgentStreamEvent::Interrupted {
                        thread_id: thread_id.clone(),
                        prompt: prompt.clone(),
                    };
                    if tx.send(interrupted).await.is_err() {
                        return;
                    }
                    AgentStreamEvent::Final {
                        thread_id,
                        response: prompt,
                        interrupted: true,
                        graph_steps: state.current_graph_step,
                        usage: tracker.totals(),
                    }
                }
                Some(Ok(GraphOutcome::Completed { state })) => {
                    let request = state.original_request().unwrap_or(&fallback);
                    let answer = last_ai_content(&state.messages).unwrap_or_default().to_string();
                    record_iteration(&memory, &agent_id, request, &answer).await;
                    AgentStreamEvent::Final {
                        thread_id,
                        response: answer,
                        interrupted: false,
                        graph_steps: state.current_graph_step,
                        usage: tracker.totals(),
                    }
                }
                Some(Err(e)) => AgentStreamEvent::Error {
                    message: e.to_string(),
                },
                None => AgentStreamEvent::Error {
                    message: "stream ended without a result".into(),
                },
            };
            let _ = tx.send(last).await;
        });
        rx
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn record_iteration(memory: &ConversationMemory, agent_id: &str, question: &str, answer: &str) {
    if answer.is_empty() {
        return;
    }
    if let Err(e) = memory.record(agent_id, question, answer).await {
        warn!(agent = %agent_id, "Failed to record iteration: {e}");
    }
}
