//! Workflow controller errors.

use snak_core::error::{CheckpointError, ModelError, ToolError};
use snak_graph::GraphError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow execution timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("No agents registered")]
    NoAgents,

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// Failure inside one agent; the controller turns it into a message.
    #[error("Agent {agent} failed: {reason}")]
    Agent { agent: String, reason: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

impl WorkflowError {
    pub fn agent(agent: impl Into<String>, reason: impl ToString) -> Self {
        Self::Agent {
            agent: agent.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<ModelError> for WorkflowError {
    fn from(err: ModelError) -> Self {
        Self::Graph(GraphError::Model(err))
    }
}

impl From<ToolError> for WorkflowError {
    fn from(err: ToolError) -> Self {
        Self::Graph(GraphError::ToolExecution(err))
    }
}
