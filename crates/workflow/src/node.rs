//! The node wrapper every registered agent runs inside.
//!
//! Checks, in order: the iteration ceiling, the repeated-call ceiling, then
//! runs the agent and normalizes what it returned. Agent failures never
//! escape this function; they become messages.

use serde_json::json;
use snak_core::message::{Message, error_tags, metadata_keys};
use tracing::{debug, error, info, warn};

use crate::agent::{AgentContext, AgentKind, Roster, SUPERVISOR_AGENT_ID, TOOLS_AGENT_ID, WorkflowAgent};
use crate::state::{Target, WorkflowState, WorkflowUpdate};

/// Ceilings applied by the node wrapper.
#[derive(Debug, Clone, Copy)]
pub struct NodeLimits {
    pub max_iterations: u32,
    pub max_consecutive_calls: u32,
}

fn terminal(agent: &str, tag: &str, content: String) -> WorkflowUpdate {
    WorkflowUpdate {
        messages: vec![
            Message::assistant(content)
                .finalized()
                .with_error(tag)
                .from_agent(agent),
        ],
        current_agent: Some(Target::End),
        ..WorkflowUpdate::default()
    }
}

pub async fn run_agent(
    agent: &dyn WorkflowAgent,
    state: &WorkflowState,
    ctx: &AgentContext<'_>,
    limits: NodeLimits,
) -> WorkflowUpdate {
    let id = agent.id();
    let is_tools = agent.kind() == AgentKind::Tools || id == TOOLS_AGENT_ID;

    if state.iteration_count >= limits.max_iterations {
        warn!(agent = id, iterations = state.iteration_count, "Workflow iteration ceiling reached");
        return terminal(
            id,
            error_tags::MAX_ITERATIONS_REACHED,
            format!(
                "Reached the maximum of {} workflow iterations. Stopping here.",
                limits.max_iterations
            ),
        );
    }

    if !is_tools {
        let consecutive = state.metadata.consecutive_calls(id, TOOLS_AGENT_ID);
        if consecutive >= limits.max_consecutive_calls {
            warn!(agent = id, consecutive, "Agent called repeatedly, stopping the workflow");
            return terminal(
                id,
                error_tags::REPEATED_AGENT_CALLS,
                format!(
                    "Agent {id} was called {} times in a row without progress. Stopping here.",
                    consecutive + 1
                ),
            );
        }
    }

    let mut metadata = state.metadata.clone();
    if metadata.original_user_query.is_none() {
        metadata.original_user_query = state.user_query().map(String::from);
    }
    metadata.record_entry(id);
    if !is_tools {
        metadata.active_agent = Some(id.to_string());
    }

    let mut view = state.clone();
    view.metadata = metadata.clone();

    debug!(agent = id, iteration = state.iteration_count, "Entering agent");
    let output = match agent.execute(&view, ctx).await {
        Ok(output) => output,
        Err(e) => {
            error!(agent = id, "Agent failed: {e}");
            let message = Message::assistant(format!("Agent {id} could not complete its task."))
                .with_error(error_tags::EXECUTION_ERROR)
                .from_agent(id);
            let fallback = ctx
                .roster
                .find(SUPERVISOR_AGENT_ID)
                .filter(|supervisor| supervisor.id != id);
            return match fallback {
                Some(supervisor) => WorkflowUpdate {
                    messages: vec![
                        message
                            .non_final()
                            .with_metadata(metadata_keys::NEXT_AGENT, json!(supervisor.id)),
                    ],
                    metadata: Some(metadata),
                    ..WorkflowUpdate::default()
                },
                None => WorkflowUpdate {
                    messages: vec![message.finalized()],
                    current_agent: Some(Target::End),
                    metadata: Some(metadata),
                    error: Some(e.to_string()),
                },
            };
        }
    };

    let mut normalized = output.normalize(id);
    let mut update = WorkflowUpdate::default();

    let Some(last) = normalized.messages.last_mut() else {
        warn!(agent = id, "Agent returned no messages, ending the workflow");
        update.current_agent = Some(Target::End);
        update.metadata = Some(metadata);
        return update;
    };

    if last.requests_clarification() {
        info!(agent = id, "Agent requested clarification");
        metadata.waiting_for_input = true;
    }

    match normalized.next_agent.take() {
        Some(next) => {
            let resolved = if next == id && !is_tools {
                debug!(agent = id, "Self-routing redirected to the supervisor");
                SUPERVISOR_AGENT_ID.to_string()
            } else {
                next
            };
            if agent.kind() == AgentKind::Supervisor {
                metadata.selected_agent = Some(resolved.clone());
            }
            last.metadata
                .insert(metadata_keys::NEXT_AGENT.to_string(), json!(resolved));
        }
        None if normalized.is_final && !last.has_tool_calls() => {
            update.current_agent = Some(Target::End);
        }
        None => {}
    }

    info!(
        agent = id,
        messages = normalized.messages.len(),
        "Agent finished"
    );
    update.messages = normalized.messages;
    update.metadata = Some(metadata);
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentInfo, AgentOutput};
    use crate::test_helpers::*;

    fn limits() -> NodeLimits {
        NodeLimits {
            max_iterations: 15,
            max_consecutive_calls: 3,
        }
    }

    fn roster_of(ids: &[(&str, AgentKind)]) -> Vec<AgentInfo> {
        ids.iter()
            .map(|(id, kind)| AgentInfo {
                id: id.to_string(),
                kind: *kind,
                description: String::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn fourth_consecutive_call_is_terminal_regardless_of_output() {
        let worker = ScriptedAgent::new("worker", AgentKind::Executor, vec![]);
        let roster = roster_of(&[("worker", AgentKind::Executor)]);
        let ctx = AgentContext {
            roster: &roster,
            thread_id: "t",
        };
        let mut state = WorkflowState::new("go", Target::agent("worker"));
        for _ in 0..3 {
            state.metadata.record_entry("worker");
        }

        let update = run_agent(worker.as_ref(), &state, &ctx, limits()).await;
        assert_eq!(update.current_agent, Some(Target::End));
        assert_eq!(
            update.messages[0].error.as_deref(),
            Some(error_tags::REPEATED_AGENT_CALLS)
        );
        assert_eq!(worker.calls(), 0);
    }

    #[tokio::test]
    async fn tools_agent_is_exempt_from_repeat_ceiling() {
        let tools = ScriptedAgent::new(
            "tools",
            AgentKind::Tools,
            vec![Ok(AgentOutput::Text("ok".into()))],
        );
        let roster = roster_of(&[("tools", AgentKind::Tools)]);
        let ctx = AgentContext {
            roster: &roster,
            thread_id: "t",
        };
        let mut state = WorkflowState::new("go", Target::agent("tools"));
        for _ in 0..5 {
            state.metadata.record_entry("tools");
        }
        let update = run_agent(tools.as_ref(), &state, &ctx, limits()).await;
        assert!(update.current_agent.is_none());
        assert_eq!(tools.calls(), 1);
    }

    #[tokio::test]
    async fn iteration_ceiling_short_circuits() {
        let worker = ScriptedAgent::new("worker", AgentKind::Executor, vec![]);
        let roster = roster_of(&[("worker", AgentKind::Executor)]);
        let ctx = AgentContext {
            roster: &roster,
            thread_id: "t",
        };
        let mut state = WorkflowState::new("go", Target::agent("worker"));
        state.iteration_count = 15;
        let update = run_agent(worker.as_ref(), &state, &ctx, limits()).await;
        assert_eq!(
            update.messages[0].error.as_deref(),
            Some(error_tags::MAX_ITERATIONS_REACHED)
        );
        assert_eq!(update.current_agent, Some(Target::End));
    }

    #[tokio::test]
    async fn self_route_is_redirected_to_supervisor() {
        let worker = ScriptedAgent::new(
            "worker",
            AgentKind::Executor,
            vec![Ok(AgentOutput::Envelope {
                messages: vec![Message::assistant("again")],
                next_agent: Some("worker".into()),
                is_final: false,
            })],
        );
        let roster = roster_of(&[
            ("supervisor", AgentKind::Supervisor),
            ("worker", AgentKind::Executor),
        ]);
        let ctx = AgentContext {
            roster: &roster,
            thread_id: "t",
        };
        let state = WorkflowState::new("go", Target::agent("worker"));
        let update = run_agent(worker.as_ref(), &state, &ctx, limits()).await;
        assert_eq!(update.messages[0].next_agent(), Some("supervisor"));
        assert_eq!(update.messages[0].from.as_deref(), Some("worker"));
    }

    #[tokio::test]
    async fn original_query_survives_rewrites() {
        let worker = ScriptedAgent::new(
            "worker",
            AgentKind::Executor,
            vec![Ok(AgentOutput::Text("done".into()))],
        );
        let roster = roster_of(&[("worker", AgentKind::Executor)]);
        let ctx = AgentContext {
            roster: &roster,
            thread_id: "t",
        };
        let mut state = WorkflowState::new("send 5 STRK to bob", Target::agent("worker"));
        state.metadata.original_user_query = None;
        state
            .messages
            .push(Message::assistant("rewritten: transfer").from_agent("supervisor"));

        let update = run_agent(worker.as_ref(), &state, &ctx, limits()).await;
        let seen = worker.seen_queries();
        assert_eq!(seen, vec![Some("send 5 STRK to bob".to_string())]);
        assert_eq!(
            update.metadata.unwrap().original_user_query.as_deref(),
            Some("send 5 STRK to bob")
        );
    }

    #[tokio::test]
    async fn failures_become_messages_routed_to_supervisor() {
        let worker = ScriptedAgent::new(
            "worker",
            AgentKind::Executor,
            vec![Err(crate::error::WorkflowError::agent("worker", "rpc down"))],
        );
        let roster = roster_of(&[
            ("supervisor", AgentKind::Supervisor),
            ("worker", AgentKind::Executor),
        ]);
        let ctx = AgentContext {
            roster: &roster,
            thread_id: "t",
        };
        let state = WorkflowState::new("go", Target::agent("worker"));
        let update = run_agent(worker.as_ref(), &state, &ctx, limits()).await;
        let msg = &update.messages[0];
        assert_eq!(msg.error.as_deref(), Some(error_tags::EXECUTION_ERROR));
        assert!(!msg.content.contains("rpc down"));
        assert_eq!(msg.next_agent(), Some("supervisor"));
        assert!(update.error.is_none());

        let alone = ScriptedAgent::new(
            "worker",
            AgentKind::Executor,
            vec![Err(crate::error::WorkflowError::agent("worker", "rpc down"))],
        );
        let roster = roster_of(&[("worker", AgentKind::Executor)]);
        let ctx = AgentContext {
            roster: &roster,
            thread_id: "t",
        };
        let update = run_agent(alone.as_ref(), &state, &ctx, limits()).await;
        assert_eq!(update.current_agent, Some(Target::End));
        assert!(update.error.is_some());
    }

    #[tokio::test]
    async fn supervisor_selection_is_recorded() {
        let supervisor = ScriptedAgent::new(
            "supervisor",
            AgentKind::Supervisor,
            vec![Ok(AgentOutput::Envelope {
                messages: vec![Message::assistant("analyst, please look")],
                next_agent: Some("analyst".into()),
                is_final: false,
            })],
        );
        let roster = roster_of(&[
            ("supervisor", AgentKind::Supervisor),
            ("analyst", AgentKind::Executor),
        ]);
        let ctx = AgentContext {
            roster: &roster,
            thread_id: "t",
        };
        let state = WorkflowState::new("go", Target::agent("supervisor"));
        let update = run_agent(supervisor.as_ref(), &state, &ctx, limits()).await;
        let meta = update.metadata.unwrap();
        assert_eq!(meta.selected_agent.as_deref(), Some("analyst"));
        assert_eq!(meta.agent_history, vec!["supervisor".to_string()]);
    }
}
