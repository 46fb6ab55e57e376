//! Shared conversion of handled node failures into messages.

use snak_core::message::{Message, error_tags};
use tracing::{error, warn};

use crate::error::GraphError;
use crate::state::{ExecutionState, NodeId, StateUpdate};

/// Turn a handled failure of `node` into a state update.
///
/// Timeouts become a non-final message the validator records as a failed
/// attempt. Structural errors end the run with a readable final message;
/// the error itself is only logged.
pub fn handle_node_error(
    node: NodeId,
    err: &GraphError,
    state: &ExecutionState,
    max_retry: u32,
) -> StateUpdate {
    let update = StateUpdate::from_node(node);
    match err {
        GraphError::ModelTimeout { .. } | GraphError::ToolTimeout { .. } => {
            warn!(node = %node, "Node timed out: {err}");
            let tag = if matches!(err, GraphError::ToolTimeout { .. }) {
                error_tags::TOOL_TIMEOUT
            } else {
                error_tags::MODEL_TIMEOUT
            };
            let update = update.with_message(
                Message::assistant(err.to_string())
                    .non_final()
                    .with_error(tag)
                    .from_agent(node.as_str()),
            );
            if node == NodeId::Validator {
                update.with_retry((state.retry + 1).min(max_retry))
            } else {
                update
            }
        }
        _ => {
            error!(node = %node, "Node failed: {err}");
            update.with_message(
                Message::assistant(
                    "I could not complete this request because of an internal error.",
                )
                .finalized()
                .with_error(error_tags::EXECUTION_ERROR)
                .from_agent(node.as_str()),
            )
        }
    }
}
