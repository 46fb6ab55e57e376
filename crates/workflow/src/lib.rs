//! # snak workflow
//!
//! The workflow controller schedules whole agents (a supervisor, specialized
//! executors, a tool runner) under one router. It enforces its own ceilings
//! on top of each agent's internal limits: an iteration cap per run, a cap on
//! consecutive calls to the same agent, and a timeout around the whole run.
//! State can be checkpointed per thread id so a conversation continues
//! across calls.

pub mod agent;
pub mod agents;
pub mod controller;
pub mod error;
pub mod node;
pub mod router;
pub mod state;

#[cfg(test)]
mod test_helpers;

pub use agent::{
    AgentContext, AgentInfo, AgentKind, AgentOutput, Roster, SELECTOR_AGENT_ID,
    SUPERVISOR_AGENT_ID, TOOLS_AGENT_ID, WorkflowAgent,
};
pub use agents::{SupervisorAgent, ToolsAgent};
pub use controller::WorkflowController;
pub use error::WorkflowError;
pub use state::{Target, WorkflowMetadata, WorkflowState, WorkflowUpdate};
