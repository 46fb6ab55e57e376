//! Workflow-level state, one level above the executor graph state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use snak_core::message::{Message, MessageToolCall, Role, last_ai_content};

/// Where control goes next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Target {
    Agent(String),
    End,
}

impl Target {
    pub fn agent(id: impl Into<String>) -> Self {
        Self::Agent(id.into())
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Agent(id) => Some(id),
            Self::End => None,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "{id}"),
            Self::End => write!(f, "__end__"),
        }
    }
}

/// Bookkeeping carried across agent hops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Every agent entered, in order
    #[serde(default)]
    pub agent_history: Vec<String>,
    #[serde(default)]
    pub agent_execution_count: HashMap<String, u32>,
    /// The user's literal ask, preserved across rewrites
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_user_query: Option<String>,
    /// Set when the run ended on a clarification request
    #[serde(default)]
    pub waiting_for_input: bool,
    /// Last non-tools agent, where tool results are returned to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_agent: Option<String>,
    /// Agent picked by the supervisor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_agent: Option<String>,
    #[serde(default)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowMetadata {
    /// How many times in a row `agent` has been entered, not counting hops
    /// through the tools agent.
    pub fn consecutive_calls(&self, agent: &str, tools_agent: &str) -> u32 {
        self.agent_history
            .iter()
            .rev()
            .filter(|id| id.as_str() != tools_agent)
            .take_while(|id| id.as_str() == agent)
            .count() as u32
    }

    pub fn record_entry(&mut self, agent: &str) {
        self.agent_history.push(agent.to_string());
        *self
            .agent_execution_count
            .entry(agent.to_string())
            .or_default() += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub messages: Vec<Message>,
    pub current_agent: Target,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    /// Tool calls pending on the last message
    #[serde(default)]
    pub tool_calls: Vec<MessageToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub iteration_count: u32,
}

impl WorkflowState {
    pub fn new(input: impl Into<String>, entry: Target) -> Self {
        let input = input.into();
        Self {
            messages: vec![Message::user(input.clone())],
            current_agent: entry,
            metadata: WorkflowMetadata {
                original_user_query: Some(input),
                ..WorkflowMetadata::default()
            },
            tool_calls: Vec::new(),
            error: None,
            iteration_count: 0,
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Content of the last assistant message with text.
    pub fn response(&self) -> Option<&str> {
        last_ai_content(&self.messages)
    }

    /// The original query, else the latest user message.
    pub fn user_query(&self) -> Option<&str> {
        self.metadata.original_user_query.as_deref().or_else(|| {
            self.messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
        })
    }

    /// Merge a node's update. The iteration counter always advances.
    pub fn apply(&mut self, update: WorkflowUpdate) {
        self.messages.extend(update.messages);
        if let Some(target) = update.current_agent {
            self.current_agent = target;
        }
        if let Some(metadata) = update.metadata {
            self.metadata = metadata;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        self.tool_calls = self
            .last_message()
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();
        self.iteration_count += 1;
    }
}

/// What one agent node returns.
#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdate {
    pub messages: Vec<Message>,
    /// Set only to force a destination; `End` stops the run
    pub current_agent: Option<Target>,
    pub metadata: Option<WorkflowMetadata>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_calls_skip_tool_hops() {
        let mut meta = WorkflowMetadata::default();
        for id in ["supervisor", "worker", "tools", "worker", "tools", "worker"] {
            meta.record_entry(id);
        }
        assert_eq!(meta.consecutive_calls("worker", "tools"), 3);
        assert_eq!(meta.consecutive_calls("supervisor", "tools"), 0);
        assert_eq!(meta.agent_execution_count["worker"], 3);
    }

    #[test]
    fn apply_counts_every_entry() {
        let mut state = WorkflowState::new("hi", Target::agent("worker"));
        state.apply(WorkflowUpdate {
            messages: vec![Message::assistant("hello")],
            ..WorkflowUpdate::default()
        });
        state.apply(WorkflowUpdate::default());
        assert_eq!(state.iteration_count, 2);
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.current_agent, Target::agent("worker"));
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = WorkflowState::new("hi", Target::End);
        state.metadata.record_entry("worker");
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["current_agent"]["type"], "end");
        let back: WorkflowState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }
}
