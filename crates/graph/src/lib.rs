//! # snak graph
//!
//! The executor graph: a per-agent state machine over planner, reasoning,
//! tools, validator, human and end nodes. Each node returns a partial
//! [`StateUpdate`]; the runtime merges it, counts the transition, stores a
//! checkpoint and asks the router for the next node.
//!
//! Routing is pure: the same state and run configuration always give the
//! same next node. Which routing table applies is decided by the agent mode
//! and the execution mode together.

pub mod config;
pub mod error;
pub mod error_handler;
pub mod nodes;
pub mod prompt;
pub mod react;
pub mod router;
pub mod runtime;
pub mod state;

#[cfg(test)]
mod test_helpers;

pub use config::RunConfig;
pub use error::GraphError;
pub use nodes::{EventSender, GraphNode, GraphServices, RunContext};
pub use router::RouterKind;
pub use runtime::{ExecutorGraph, GRAPH_EVENT_NAME, GraphOutcome};
pub use state::{
    ExecutionState, History, HistoryItem, NodeId, Plan, PlanOrHistory, Route, StateUpdate, Step,
    StepStatus,
};
