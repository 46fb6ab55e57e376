//! Supervisor agent.
//!
//! Reads the user's request and the recent conversation, then either
//! delegates to one of the registered agents or answers directly.
//!
//! ```text
//! User request
//!       │
//!       ▼
//! ┌────────────┐
//! │ Supervisor │  ← picks the next agent, or answers
//! └──┬──────┬──┘
//!    │      │
//!    ▼      ▼
//! ┌──────┐ ┌──────┐
//! │ A-1  │ │ A-2  │  ← specialized agents
//! └──────┘ └──────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use snak_core::message::{Message, Role};
use snak_core::model::{ChatModel, ModelRequest};
use snak_graph::GraphError;
use tracing::{debug, info};

use crate::agent::{AgentContext, AgentKind, AgentOutput, SUPERVISOR_AGENT_ID, WorkflowAgent};
use crate::error::WorkflowError;
use crate::state::WorkflowState;

/// Messages of recent conversation shown to the supervisor.
const RECENT_MESSAGES: usize = 6;

#[derive(Debug, Deserialize)]
struct Decision {
    #[serde(default)]
    next_agent: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default, rename = "final")]
    is_final: bool,
    #[serde(default)]
    response: Option<String>,
}

fn decision_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "next_agent": { "type": ["string", "null"] },
            "instructions": { "type": ["string", "null"] },
            "final": { "type": "boolean" },
            "response": { "type": ["string", "null"] }
        },
        "required": ["final"]
    })
}

pub struct SupervisorAgent {
    model: Arc<dyn ChatModel>,
    timeout_ms: u64,
}

impl SupervisorAgent {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            timeout_ms: 45_000,
        }
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    fn build_request(&self, state: &WorkflowState, ctx: &AgentContext<'_>) -> ModelRequest {
        let agents = ctx
            .roster
            .iter()
            .filter(|a| matches!(a.kind, AgentKind::Executor | AgentKind::Selector))
            .map(|a| format!("- {}: {}", a.id, a.description))
            .collect::<Vec<_>>()
            .join("\n");
        let system = format!(
            "You coordinate a team of agents. Either delegate the request to exactly one \
             agent by setting next_agent and instructions, or answer directly by setting \
             final to true and writing the response.\n\nAvailable agents:\n{agents}"
        );

        let recent = state
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .rev()
            .take(RECENT_MESSAGES)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|m| {
                let who = m.from.as_deref().unwrap_or(match m.role {
                    Role::User => "user",
                    Role::Tool => "tool",
                    _ => "assistant",
                });
                format!("[{who}] {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let query = state.user_query().unwrap_or_default();

        ModelRequest::new(vec![
            Message::system(system),
            Message::user(format!(
                "User request: {query}\n\nRecent conversation:\n{recent}"
            )),
        ])
        .with_temperature(0.0)
    }
}

#[async_trait]
impl WorkflowAgent for SupervisorAgent {
    fn id(&self) -> &str {
        SUPERVISOR_AGENT_ID
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Supervisor
    }

    fn description(&self) -> &str {
        "Delegates each request to the most suitable agent"
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        ctx: &AgentContext<'_>,
    ) -> Result<AgentOutput, WorkflowError> {
        let request = self.build_request(state, ctx);
        let schema = decision_schema();
        let value = tokio::time::timeout(
            Duration::from_millis(self.timeout_ms),
            self.model.invoke_structured(request, &schema),
        )
        .await
        .map_err(|_| GraphError::ModelTimeout { ms: self.timeout_ms })??;

        let decision: Decision = serde_json::from_value(value)
            .map_err(|e| WorkflowError::agent(SUPERVISOR_AGENT_ID, format!("malformed decision: {e}")))?;
        debug!(?decision, "Supervisor decision");

        match decision.next_agent.filter(|n| !n.trim().is_empty()) {
            Some(next) if !decision.is_final => {
                info!(next_agent = %next, "Supervisor delegating");
                let instructions = decision
                    .instructions
                    .filter(|i| !i.trim().is_empty())
                    .unwrap_or_else(|| format!("Handing the request to {next}."));
                Ok(AgentOutput::Envelope {
                    messages: vec![Message::assistant(instructions).non_final()],
                    next_agent: Some(next),
                    is_final: false,
                })
            }
            _ => {
                info!("Supervisor answering directly");
                let response = decision
                    .response
                    .or(decision.instructions)
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "There is nothing more to do for this request.".to_string());
                Ok(AgentOutput::Envelope {
                    messages: vec![Message::assistant(response).finalized()],
                    next_agent: None,
                    is_final: true,
                })
            }
        }
    }
}
