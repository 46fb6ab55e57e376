//! Routing between executor graph nodes.
//!
//! Routers are pure functions of the state and the run configuration.
//! `executor_router` is the single place that picks a routing table from
//! the agent mode and the execution mode.

use snak_core::agent::{AgentMode, ExecutionMode};
use snak_core::message::{Message, Role, is_final_message};
use tracing::debug;

use crate::config::RunConfig;
use crate::state::{ExecutionState, NodeId, Route};

/// Which routing table a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterKind {
    Planning,
    Reactive,
    Hybrid,
}

impl RouterKind {
    pub fn for_modes(mode: AgentMode, execution_mode: ExecutionMode) -> Self {
        match (mode, execution_mode) {
            (AgentMode::Hybrid, _) => Self::Hybrid,
            (AgentMode::Interactive, ExecutionMode::Reactive) => Self::Reactive,
            _ => Self::Planning,
        }
    }
}

/// The first node of a fresh run.
pub fn entry_node(state: &ExecutionState, config: &RunConfig) -> NodeId {
    let needs_plan = config.execution_mode == ExecutionMode::Planning
        && state.plan().is_some_and(|plan| plan.steps.is_empty());
    if needs_plan {
        NodeId::Planner
    } else {
        NodeId::Reasoning
    }
}

/// Where to go after `from` has run and its update has been applied.
pub fn next_route(from: NodeId, state: &ExecutionState, config: &RunConfig, max_retry: u32) -> Route {
    let route = match from {
        NodeId::Planner | NodeId::Human => Route::Node(NodeId::Reasoning),
        NodeId::EndGraph => Route::End,
        _ => executor_router(state, config, max_retry),
    };
    debug!(from = %from, route = ?route, "Routed");
    route
}

/// Dispatch to the routing table selected by the run's modes.
pub fn executor_router(state: &ExecutionState, config: &RunConfig, max_retry: u32) -> Route {
    match RouterKind::for_modes(config.mode(), config.execution_mode) {
        RouterKind::Planning => should_continue(state, config, max_retry),
        RouterKind::Reactive => should_continue_reactive(state),
        RouterKind::Hybrid => should_continue_hybrid(state, config, max_retry),
    }
}

fn step_ceiling_reached(state: &ExecutionState, config: &RunConfig) -> bool {
    state.current_graph_step >= config.max_graph_steps
}

fn is_final(message: Option<&Message>) -> bool {
    message.is_some_and(is_final_message)
}

fn has_tool_calls(message: Option<&Message>) -> bool {
    message.is_some_and(Message::has_tool_calls)
}

/// Planning-mode table.
pub fn should_continue(state: &ExecutionState, config: &RunConfig, max_retry: u32) -> Route {
    let last = state.last_message();
    match state.last_node {
        Some(NodeId::Reasoning) => {
            if has_tool_calls(last) {
                Route::Node(NodeId::Tools)
            } else if is_final(last) {
                Route::Node(NodeId::EndGraph)
            } else {
                Route::Node(NodeId::Validator)
            }
        }
        Some(NodeId::Tools) => {
            if is_final(last) || step_ceiling_reached(state, config) {
                Route::Node(NodeId::EndGraph)
            } else {
                Route::Node(NodeId::Validator)
            }
        }
        Some(NodeId::Validator) => {
            if is_final(last) || state.retry >= max_retry {
                Route::Node(NodeId::EndGraph)
            } else {
                Route::Node(NodeId::Reasoning)
            }
        }
        _ => Route::Node(NodeId::EndGraph),
    }
}

/// Interactive reactive table. The validator is never visited.
pub fn should_continue_reactive(state: &ExecutionState) -> Route {
    let last = state.last_message();
    match state.last_node {
        Some(NodeId::Reasoning) if has_tool_calls(last) => Route::Node(NodeId::Tools),
        _ => Route::End,
    }
}

/// Hybrid table, driven by the shape of the last message.
pub fn should_continue_hybrid(state: &ExecutionState, config: &RunConfig, max_retry: u32) -> Route {
    let Some(last) = state.last_message() else {
        return Route::Node(NodeId::EndGraph);
    };

    // Structured tool calls win over any finality marker in the text.
    if last.is_assistant() && last.has_tool_calls() {
        return Route::Node(NodeId::Tools);
    }
    if last.is_assistant() && is_final_message(last) {
        return Route::End;
    }
    if last.is_human_in_the_loop() {
        return Route::Node(NodeId::Human);
    }
    if last.role == Role::Tool {
        if step_ceiling_reached(state, config) {
            return Route::Node(NodeId::EndGraph);
        }
        return Route::Node(NodeId::Validator);
    }
    if state.last_node == Some(NodeId::Validator) {
        if state.retry < max_retry {
            return Route::Node(NodeId::Reasoning);
        }
        return Route::Node(NodeId::EndGraph);
    }
    Route::Node(NodeId::Validator)
}
