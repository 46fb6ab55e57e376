//! Per-invocation run configuration.

use snak_core::agent::{AgentConfig, AgentMode, ExecutionMode};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The configurable surface of one graph run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Checkpoint key
    pub thread_id: String,
    pub execution_mode: ExecutionMode,
    pub agent_config: AgentConfig,
    /// Global ceiling on node transitions before reasoning short-circuits
    pub max_graph_steps: u32,
    pub user_request: String,
    /// Hard cap on node executions; `None` uses the graph default
    pub recursion_limit: Option<u32>,
    pub cancellation: CancellationToken,
}

impl RunConfig {
    pub fn new(agent_config: AgentConfig, user_request: impl Into<String>) -> Self {
        Self {
            thread_id: Uuid::new_v4().to_string(),
            execution_mode: agent_config.execution_mode,
            max_graph_steps: agent_config.max_graph_steps,
            agent_config,
            user_request: user_request.into(),
            recursion_limit: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_max_graph_steps(mut self, steps: u32) -> Self {
        self.max_graph_steps = steps;
        self
    }

    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = Some(limit);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn mode(&self) -> AgentMode {
        self.agent_config.mode
    }

    /// Interactive and reactive together: the ReAct shortcut mode.
    pub fn is_react(&self) -> bool {
        self.agent_config.mode == AgentMode::Interactive
            && self.execution_mode == ExecutionMode::Reactive
    }

    pub fn is_hybrid(&self) -> bool {
        self.agent_config.mode == AgentMode::Hybrid
    }
}
