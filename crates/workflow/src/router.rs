//! Routing between workflow agents.

use snak_core::message::Role;
use tracing::debug;

use crate::agent::{AgentInfo, AgentKind, Roster, SUPERVISOR_AGENT_ID};
use crate::state::{Target, WorkflowState};

/// Pick the next agent after a node has run. Pure in its inputs.
pub fn route(state: &WorkflowState, roster: &[AgentInfo], max_iterations: u32) -> Target {
    let target = decide(state, roster, max_iterations);
    debug!(
        iteration = state.iteration_count,
        target = %target,
        "Workflow routed"
    );
    target
}

fn registered(roster: &[AgentInfo], id: &str) -> Target {
    match roster.find(id) {
        Some(agent) => Target::agent(agent.id.clone()),
        None => Target::End,
    }
}

fn first_executor(roster: &[AgentInfo]) -> Option<Target> {
    roster
        .first_of(AgentKind::Executor)
        .map(|a| Target::agent(a.id.clone()))
}

fn decide(state: &WorkflowState, roster: &[AgentInfo], max_iterations: u32) -> Target {
    if state.current_agent.is_end() || state.error.is_some() {
        return Target::End;
    }
    // Entering a node at the ceiling yields the tagged terminal message, so
    // only a run already past it is stopped here.
    if state.iteration_count > max_iterations {
        return Target::End;
    }
    let Some(last) = state.last_message() else {
        return Target::End;
    };
    if last.requests_clarification() {
        return Target::End;
    }
    if last.has_tool_calls() {
        return match roster.first_of(AgentKind::Tools) {
            Some(tools) => Target::agent(tools.id.clone()),
            None => Target::End,
        };
    }
    if let Some(hint) = last.next_agent() {
        return registered(roster, hint);
    }

    let source = last
        .from
        .as_deref()
        .and_then(|from| roster.find(from))
        .filter(|_| last.role != Role::User);
    let Some(source) = source else {
        return Target::End;
    };

    match source.kind {
        AgentKind::Supervisor => state
            .metadata
            .selected_agent
            .as_deref()
            .and_then(|id| roster.find(id))
            .filter(|a| a.id != source.id)
            .map(|a| Target::agent(a.id.clone()))
            .or_else(|| first_executor(roster))
            .or_else(|| {
                roster
                    .first_of(AgentKind::Selector)
                    .map(|a| Target::agent(a.id.clone()))
            })
            .unwrap_or(Target::End),
        AgentKind::Selector => first_executor(roster).unwrap_or(Target::End),
        AgentKind::Tools => state
            .metadata
            .active_agent
            .as_deref()
            .and_then(|id| roster.find(id))
            .map(|a| Target::agent(a.id.clone()))
            .or_else(|| first_executor(roster))
            .unwrap_or(Target::End),
        AgentKind::Executor => {
            if last.is_final == Some(false) {
                registered(roster, SUPERVISOR_AGENT_ID)
            } else {
                Target::End
            }
        }
    }
}
