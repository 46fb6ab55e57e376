//! Graph events: what a streaming run reports while it executes.
//!
//! Events are emitted by the executor graph runtime around every node and
//! every model call. Consumers (the agent wrapper, the CLI) relay them.

use serde::{Deserialize, Serialize};

/// The kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "on_chat_model_start")]
    ChatModelStart,
    #[serde(rename = "on_chat_model_stream")]
    ChatModelStream,
    #[serde(rename = "on_chat_model_end")]
    ChatModelEnd,
    #[serde(rename = "on_chain_start")]
    ChainStart,
    #[serde(rename = "on_chain_end")]
    ChainEnd,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatModelStart => "on_chat_model_start",
            Self::ChatModelStream => "on_chat_model_stream",
            Self::ChatModelEnd => "on_chat_model_end",
            Self::ChainStart => "on_chain_start",
            Self::ChainEnd => "on_chain_end",
        }
    }
}

/// A single event from a streaming run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEvent {
    /// Node or model name
    pub name: String,
    pub event: EventKind,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl GraphEvent {
    pub fn new(name: impl Into<String>, event: EventKind, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            event,
            data,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_wire_names() {
        let ev = GraphEvent::new("reasoning", EventKind::ChatModelStart, serde_json::Value::Null)
            .with_metadata("thread_id", "t1".into());
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "on_chat_model_start");
        assert_eq!(json["metadata"]["thread_id"], "t1");
        assert_eq!(EventKind::ChainEnd.as_str(), "on_chain_end");
    }
}
