//! Message domain types.
//!
//! Messages are the value objects both schedulers append to their state.
//! Beyond role and content, each message carries its provenance (`from`),
//! an optional finality flag and an optional machine-readable error tag so
//! routers never need to parse prose to decide where control goes next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker a model may emit in free text to declare it is done.
pub const FINAL_ANSWER_MARKER: &str = "FINAL ANSWER";

/// Marker a hybrid-mode model emits when it needs a human to answer.
pub const HUMAN_INPUT_MARKER: &str = "WAITING_FOR_HUMAN_INPUT";

/// Machine-readable error tags attached to terminal or degraded messages.
pub mod error_tags {
    pub const MAX_ITERATIONS_REACHED: &str = "max_iterations_reached";
    pub const MAX_RETRIES_REACHED: &str = "max_retries_reached";
    pub const REPEATED_AGENT_CALLS: &str = "repeated_agent_calls";
    pub const MODEL_TIMEOUT: &str = "model_timeout";
    pub const TOOL_TIMEOUT: &str = "tool_timeout";
    pub const EXECUTION_ERROR: &str = "execution_error";
    pub const CONTEXT_LENGTH_EXCEEDED: &str = "context_length_exceeded";
}

/// Metadata keys with meaning to the routers.
pub mod metadata_keys {
    pub const HUMAN_IN_THE_LOOP: &str = "human_in_the_loop";
    pub const NEXT_AGENT: &str = "next_agent";
    pub const NEXT_AGENT_CAMEL: &str = "nextAgent";
    pub const REQUIRES_CLARIFICATION: &str = "requires_clarification";
    /// Executor thread suspended behind a clarification request
    pub const THREAD_ID: &str = "thread_id";
    pub const TOKENS: &str = "tokens";
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (or a human answering an interrupt)
    User,
    /// A language model or an agent speaking on its behalf
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

/// A single message in an execution or workflow state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Which node or agent produced this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Explicit finality. `None` means the producer did not say.
    #[serde(rename = "final", default, skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,

    /// Machine-readable error tag (see [`error_tags`])
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Free-form metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
            from: None,
            is_final: None,
            error: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Tag the message with the node or agent that produced it.
    pub fn from_agent(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Mark the message as final.
    pub fn finalized(mut self) -> Self {
        self.is_final = Some(true);
        self
    }

    /// Mark the message as explicitly not final.
    pub fn non_final(mut self) -> Self {
        self.is_final = Some(false);
        self
    }

    /// Attach a machine-readable error tag.
    pub fn with_error(mut self, tag: impl Into<String>) -> Self {
        self.error = Some(tag.into());
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach tool calls.
    pub fn with_tool_calls(mut self, tool_calls: Vec<MessageToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Whether the message was flagged as waiting for a human.
    pub fn is_human_in_the_loop(&self) -> bool {
        self.flag(metadata_keys::HUMAN_IN_THE_LOOP)
    }

    /// Whether the message asks the caller for clarification.
    pub fn requests_clarification(&self) -> bool {
        self.flag(metadata_keys::REQUIRES_CLARIFICATION)
    }

    /// Explicit routing hint, accepting both spellings used by agents.
    pub fn next_agent(&self) -> Option<&str> {
        self.metadata
            .get(metadata_keys::NEXT_AGENT)
            .or_else(|| self.metadata.get(metadata_keys::NEXT_AGENT_CAMEL))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// The single finality predicate shared by every router.
///
/// An assistant message is final when it says so explicitly or when its
/// content carries the [`FINAL_ANSWER_MARKER`].
pub fn is_final_message(message: &Message) -> bool {
    if !message.is_assistant() {
        return false;
    }
    message.is_final == Some(true)
        || message
            .content
            .to_uppercase()
            .contains(FINAL_ANSWER_MARKER)
}

/// The last assistant message with non-empty content.
pub fn last_ai_content(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.is_assistant() && !m.content.trim().is_empty())
        .map(|m| m.content.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
        assert!(msg.from.is_none());
    }

    #[test]
    fn explicit_final_flag_is_final() {
        let msg = Message::assistant("done").finalized();
        assert!(is_final_message(&msg));
    }

    #[test]
    fn final_answer_marker_is_final() {
        let msg = Message::assistant("All steps done. final answer: 42");
        assert!(is_final_message(&msg));
    }

    #[test]
    fn user_message_is_never_final() {
        let msg = Message::user("FINAL ANSWER please").finalized();
        assert!(!is_final_message(&msg));
    }

    #[test]
    fn non_final_is_distinguishable_from_unset() {
        let unset = Message::assistant("x");
        let explicit = Message::assistant("x").non_final();
        assert_eq!(unset.is_final, None);
        assert_eq!(explicit.is_final, Some(false));
        assert!(!is_final_message(&explicit));
    }

    #[test]
    fn next_agent_accepts_both_spellings() {
        let a = Message::assistant("x").with_metadata("next_agent", "tools".into());
        let b = Message::assistant("x").with_metadata("nextAgent", "worker".into());
        let c = Message::assistant("x").with_metadata("nextAgent", "".into());
        assert_eq!(a.next_agent(), Some("tools"));
        assert_eq!(b.next_agent(), Some("worker"));
        assert_eq!(c.next_agent(), None);
    }

    #[test]
    fn serialized_field_names() {
        let msg = Message::assistant("hi")
            .from_agent("supervisor")
            .finalized()
            .with_error(error_tags::MAX_ITERATIONS_REACHED);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["from"], "supervisor");
        assert_eq!(json["final"], true);
        assert_eq!(json["error"], "max_iterations_reached");
    }

    #[test]
    fn last_ai_content_skips_empty_and_non_ai() {
        let messages = vec![
            Message::assistant("first answer"),
            Message::assistant("   "),
            Message::tool_result("c1", "tool output"),
        ];
        assert_eq!(last_ai_content(&messages), Some("first answer"));
        assert_eq!(last_ai_content(&[]), None);
    }
}
