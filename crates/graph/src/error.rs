//! Executor graph error taxonomy.

use snak_core::error::{CheckpointError, ModelError, ToolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Model invocation timeout after {ms}ms")]
    ModelTimeout { ms: u64 },

    #[error("Tool execution timeout after {ms}ms")]
    ToolTimeout { ms: u64 },

    /// A broken contract: missing plan item, missing model, missing tool calls.
    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Tool execution failed: {0}")]
    ToolExecution(#[from] ToolError),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Recursion limit of {0} node executions reached")]
    RecursionLimit(u32),

    #[error("Thread {0} is not awaiting input")]
    NotSuspended(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

impl GraphError {
    /// Whether the shared node error handler turns this into a message.
    ///
    /// Everything else propagates to the caller of the graph.
    pub fn is_handled(&self) -> bool {
        matches!(
            self,
            Self::ModelTimeout { .. } | Self::ToolTimeout { .. } | Self::Structural(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ModelTimeout { .. } | Self::ToolTimeout { .. })
    }

    pub(crate) fn structural(message: impl Into<String>) -> Self {
        Self::Structural(message.into())
    }
}
