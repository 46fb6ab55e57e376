//! The agent seam of the workflow controller.
//!
//! Agents return whatever shape is natural to them; [`AgentOutput`] names
//! every accepted shape and [`AgentOutput::normalize`] is the single point
//! where they become a plain message list.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snak_core::message::Message;

use crate::error::WorkflowError;
use crate::state::WorkflowState;

/// Id of the tool-executing agent. It may route to itself and is exempt
/// from the repeated-call ceiling.
pub const TOOLS_AGENT_ID: &str = "tools";

/// Id of the coordinating agent, the fallback destination.
pub const SUPERVISOR_AGENT_ID: &str = "supervisor";

/// Id of the optional agent-selection agent.
pub const SELECTOR_AGENT_ID: &str = "agent-selector";

/// The role an agent plays in routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Supervisor,
    Selector,
    Tools,
    /// A specialized agent that does the actual work
    Executor,
}

/// What routing knows about a registered agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    pub id: String,
    pub kind: AgentKind,
    pub description: String,
}

/// Lookup helpers over the registration-ordered agent list.
pub trait Roster {
    fn find(&self, id: &str) -> Option<&AgentInfo>;
    fn first_of(&self, kind: AgentKind) -> Option<&AgentInfo>;
}

impl Roster for [AgentInfo] {
    fn find(&self, id: &str) -> Option<&AgentInfo> {
        self.iter().find(|a| a.id == id)
    }

    fn first_of(&self, kind: AgentKind) -> Option<&AgentInfo> {
        self.iter().find(|a| a.kind == kind)
    }
}

/// Per-call context handed to an agent.
pub struct AgentContext<'a> {
    pub roster: &'a [AgentInfo],
    pub thread_id: &'a str,
}

/// An agent the controller can schedule.
#[async_trait]
pub trait WorkflowAgent: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> AgentKind;

    fn description(&self) -> &str {
        ""
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        ctx: &AgentContext<'_>,
    ) -> Result<AgentOutput, WorkflowError>;
}

/// Every result shape an agent may return.
#[derive(Debug, Clone)]
pub enum AgentOutput {
    Messages(Vec<Message>),
    /// Messages plus explicit routing signals
    Envelope {
        messages: Vec<Message>,
        next_agent: Option<String>,
        is_final: bool,
    },
    Single(Message),
    Text(String),
    Value(serde_json::Value),
}

/// The canonical form of an [`AgentOutput`].
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub messages: Vec<Message>,
    pub next_agent: Option<String>,
    pub is_final: bool,
}

impl AgentOutput {
    /// Flatten into messages, stamping `from` where the producer left it
    /// empty and lifting routing hints out of the last message.
    pub fn normalize(self, agent_id: &str) -> Normalized {
        let (messages, next_agent, is_final) = match self {
            Self::Messages(messages) => (messages, None, false),
            Self::Envelope {
                messages,
                next_agent,
                is_final,
            } => (messages, next_agent, is_final),
            Self::Single(message) => (vec![message], None, false),
            Self::Text(text) => (vec![Message::assistant(text)], None, false),
            Self::Value(value) => (messages_from_value(value), None, false),
        };

        let messages: Vec<Message> = messages
            .into_iter()
            .map(|m| {
                if m.from.is_some() {
                    m
                } else {
                    m.from_agent(agent_id)
                }
            })
            .collect();

        let last = messages.last();
        let next_agent = next_agent.or_else(|| last.and_then(|m| m.next_agent()).map(String::from));
        let is_final = is_final || last.is_some_and(|m| m.is_final == Some(true));
        Normalized {
            messages,
            next_agent,
            is_final,
        }
    }
}

fn messages_from_value(value: serde_json::Value) -> Vec<Message> {
    match value {
        serde_json::Value::Array(items) => items.into_iter().flat_map(messages_from_value).collect(),
        serde_json::Value::Object(mut map) => {
            if let Some(inner) = map.remove("messages") {
                return messages_from_value(inner);
            }
            let as_object = serde_json::Value::Object(map);
            if let Ok(message) = serde_json::from_value::<Message>(as_object.clone()) {
                return vec![message];
            }
            match as_object.get("content").and_then(|c| c.as_str()) {
                Some(content) => vec![Message::assistant(content)],
                None => vec![Message::assistant(as_object.to_string())],
            }
        }
        serde_json::Value::String(text) => vec![Message::assistant(text)],
        serde_json::Value::Null => Vec::new(),
        other => vec![Message::assistant(other.to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use snak_core::message::metadata_keys;

    #[test]
    fn text_becomes_tagged_assistant_message() {
        let out = AgentOutput::Text("hello".into()).normalize("worker");
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].from.as_deref(), Some("worker"));
        assert!(out.next_agent.is_none());
    }

    #[test]
    fn existing_provenance_is_kept() {
        let out = AgentOutput::Messages(vec![
            Message::assistant("a").from_agent("planner"),
            Message::assistant("b"),
        ])
        .normalize("worker");
        assert_eq!(out.messages[0].from.as_deref(), Some("planner"));
        assert_eq!(out.messages[1].from.as_deref(), Some("worker"));
    }

    #[test]
    fn envelope_value_and_hint_in_metadata() {
        let out = AgentOutput::Value(json!({
            "messages": [{"content": "pick wallet"}, "then send"]
        }))
        .normalize("worker");
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[1].content, "then send");

        let hinted = AgentOutput::Single(
            Message::assistant("over to you").with_metadata(metadata_keys::NEXT_AGENT_CAMEL, json!("analyst")),
        )
        .normalize("supervisor");
        assert_eq!(hinted.next_agent.as_deref(), Some("analyst"));
    }

    #[test]
    fn primitive_values_are_stringified() {
        let out = AgentOutput::Value(json!(42)).normalize("worker");
        assert_eq!(out.messages[0].content, "42");
        assert!(AgentOutput::Value(json!(null)).normalize("w").messages.is_empty());
    }

    #[test]
    fn final_flag_from_envelope_or_message() {
        let out = AgentOutput::Envelope {
            messages: vec![Message::assistant("done")],
            next_agent: None,
            is_final: true,
        }
        .normalize("supervisor");
        assert!(out.is_final);

        let out = AgentOutput::Single(Message::assistant("done").finalized()).normalize("w");
        assert!(out.is_final);
    }

    #[test]
    fn roster_lookup() {
        let roster = vec![
            AgentInfo {
                id: "tools".into(),
                kind: AgentKind::Tools,
                description: String::new(),
            },
            AgentInfo {
                id: "worker".into(),
                kind: AgentKind::Executor,
                description: String::new(),
            },
        ];
        assert_eq!(roster.first_of(AgentKind::Executor).unwrap().id, "worker");
        assert!(roster.find("supervisor").is_none());
    }
}
