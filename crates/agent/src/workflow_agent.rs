//! A [`SnakAgent`] as a specialized executor inside the workflow controller.

use async_trait::async_trait;
use serde_json::json;
use snak_core::agent::AgentMode;
use snak_core::error::CheckpointError;
use snak_core::message::{Message, Role, metadata_keys};
use snak_graph::GraphError;
use snak_workflow::{
    AgentContext, AgentKind, AgentOutput, SUPERVISOR_AGENT_ID, WorkflowAgent, WorkflowError,
    WorkflowState,
};
use tracing::{info, warn};

use crate::error::AgentError;
use crate::snak_agent::SnakAgent;

/// What the agent is asked to do: the user's request, followed by the
/// supervisor's instructions when it just delegated or by the user's latest
/// reply when the workflow continued after a question.
fn request_for(state: &WorkflowState) -> Option<String> {
    let last = state.last_message();
    let delegated = last
        .filter(|m| m.role == Role::Assistant && m.from.as_deref() == Some(SUPERVISOR_AGENT_ID))
        .map(|m| m.content.trim())
        .filter(|c| !c.is_empty());
    let reply = last
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.trim())
        .filter(|c| !c.is_empty());
    match (state.user_query(), delegated, reply) {
        (Some(query), Some(instructions), _) if instructions != query => {
            Some(format!("{query}\n\nInstructions: {instructions}"))
        }
        (Some(query), _, Some(reply)) if reply != query => {
            Some(format!("{query}\n\nUser reply: {reply}"))
        }
        (Some(query), _, _) => Some(query.to_string()),
        (None, instructions, reply) => instructions.or(reply).map(str::to_string),
    }
}

/// The suspended thread and the user's answer, when the last exchange was
/// this agent asking for clarification.
fn pending_clarification<'a>(state: &'a WorkflowState, agent_id: &str) -> Option<(&'a str, &'a str)> {
    let (answer, earlier) = state.messages.split_last()?;
    if answer.role != Role::User {
        return None;
    }
    let question = earlier.iter().rev().find(|m| m.role == Role::Assistant)?;
    if question.from.as_deref() != Some(agent_id) || !question.requests_clarification() {
        return None;
    }
    let thread_id = question.metadata.get(metadata_keys::THREAD_ID)?.as_str()?;
    Some((thread_id, answer.content.as_str()))
}

fn to_workflow_error(agent_id: &str, error: AgentError) -> WorkflowError {
    match error {
        AgentError::Graph(e) => WorkflowError::Graph(e),
        other => WorkflowError::agent(agent_id, other.to_string()),
    }
}

#[async_trait]
impl WorkflowAgent for SnakAgent {
    fn id(&self) -> &str {
        SnakAgent::id(self)
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Executor
    }

    fn description(&self) -> &str {
        &self.config().description
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        ctx: &AgentContext<'_>,
    ) -> Result<AgentOutput, WorkflowError> {
        let request = request_for(state)
            .ok_or_else(|| WorkflowError::agent(self.id(), "nothing to work on"))?;
        info!(agent = %self.id(), thread_id = ctx.thread_id, "Workflow handed over to agent");

        let pending = pending_clarification(state, self.id())
            .filter(|_| self.mode() == AgentMode::Hybrid);
        let resumed = match pending {
            Some((thread_id, answer)) => match self.resume_hybrid(thread_id, answer).await {
                Ok(response) => Some(response),
                Err(AgentError::Graph(
                    GraphError::Checkpoint(CheckpointError::NotFound(_)) | GraphError::NotSuspended(_),
                )) => {
                    warn!(agent = %self.id(), thread_id, "Suspended run is gone, starting over");
                    None
                }
                Err(e) => return Err(to_workflow_error(self.id(), e)),
            },
            None => None,
        };
        let response = match resumed {
            Some(response) => response,
            None => SnakAgent::execute(self, &request)
                .await
                .map_err(|e| to_workflow_error(self.id(), e))?,
        };

        // A hybrid interrupt becomes a clarification request for the user.
        let message = if response.interrupted {
            Message::assistant(response.response)
                .with_metadata(metadata_keys::REQUIRES_CLARIFICATION, json!(true))
                .with_metadata(metadata_keys::THREAD_ID, json!(response.thread_id))
        } else {
            Message::assistant(response.response).finalized()
        };
        Ok(AgentOutput::Single(message))
    }
}
