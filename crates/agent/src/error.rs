//! Agent wrapper errors.

use snak_core::agent::AgentMode;
use snak_graph::GraphError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent {0} is not initialized")]
    NotInitialized(String),

    #[error("Agent {agent} runs in {mode} mode; only hybrid runs can be resumed")]
    NotHybrid { agent: String, mode: AgentMode },

    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}
