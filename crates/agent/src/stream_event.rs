//! Agent-level streaming events.
//!
//! `AgentStreamEvent` wraps the executor graph's low-level events into the
//! smaller vocabulary a caller renders: text chunks, node boundaries and one
//! closing `final` (or `error`) event.

use serde::{Deserialize, Serialize};
use snak_core::event::{EventKind, GraphEvent};
use snak_core::token::TokenTotals;

/// Events emitted by [`crate::SnakAgent::execute_stream`].
///
/// - `model_start` / `model_end`: a model call began or finished
/// - `chunk`: partial text from the model
/// - `node_start` / `node_end`: a graph node ran
/// - `interrupted`: the run is waiting for human input
/// - `final`: the stream is complete
/// - `error`: the run failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    ModelStart {
        model: String,
        node: Option<String>,
    },

    Chunk {
        content: String,
    },

    ModelEnd {
        model: String,
        node: Option<String>,
        /// Number of tool calls the model asked for
        tool_calls: usize,
    },

    NodeStart {
        node: String,
        graph_step: u32,
    },

    NodeEnd {
        node: String,
        graph_step: u32,
    },

    /// Resume with [`crate::SnakAgent::resume_hybrid`].
    Interrupted {
        thread_id: String,
        prompt: String,
    },

    /// The stream is complete.
    Final {
        thread_id: String,
        response: String,
        interrupted: bool,
        graph_steps: u32,
        usage: TokenTotals,
    },

    Error {
        message: String,
    },
}

impl AgentStreamEvent {
    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ModelStart { .. } => "model_start",
            Self::Chunk { .. } => "chunk",
            Self::ModelEnd { .. } => "model_end",
            Self::NodeStart { .. } => "node_start",
            Self::NodeEnd { .. } => "node_end",
            Self::Interrupted { .. } => "interrupted",
            Self::Final { .. } => "final",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event closes a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::Error { .. })
    }

    /// Map one graph event. The closing graph event is handled by the caller
    /// and yields `None` here.
    pub fn from_graph_event(event: &GraphEvent) -> Option<Self> {
        let node = event
            .metadata
            .get("node")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let graph_step = event
            .data
            .get("graph_step")
            .and_then(|v| v.as_u64())
            .unwrap_or_default() as u32;

        match event.event {
            EventKind::ChatModelStart => Some(Self::ModelStart {
                model: event.name.clone(),
                node,
            }),
            EventKind::ChatModelStream => {
                let content = event.data.get("chunk").and_then(|v| v.as_str())?;
                (!content.is_empty()).then(|| Self::Chunk {
                    content: content.to_string(),
                })
            }
            EventKind::ChatModelEnd => Some(Self::ModelEnd {
                model: event.name.clone(),
                node,
                tool_calls: event
                    .data
                    .get("tool_calls")
                    .and_then(|v| v.as_u64())
                    .unwrap_or_default() as usize,
            }),
            EventKind::ChainStart => Some(Self::NodeStart {
                node: event.name.clone(),
                graph_step,
            }),
            EventKind::ChainEnd if event.name == snak_graph::GRAPH_EVENT_NAME => None,
            EventKind::ChainEnd => Some(Self::NodeEnd {
                node: event.name.clone(),
                graph_step,
            }),
        }
    }
}
