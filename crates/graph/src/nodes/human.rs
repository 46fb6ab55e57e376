//! Human node: the interrupt point of hybrid runs.
//!
//! The runtime never "runs" this node. Reaching it suspends the graph with
//! an `AwaitingInput` checkpoint; resuming feeds the input back through
//! [`HumanNode::resume`].

use snak_core::message::Message;

use crate::state::{ExecutionState, NodeId, PlanOrHistory, StateUpdate};

pub struct HumanNode;

impl HumanNode {
    /// The question shown to whoever answers the interrupt: the model's own
    /// question when the last message asked for input, else the current
    /// step or history item.
    pub fn prompt(state: &ExecutionState) -> String {
        if let Some(last) = state.last_message()
            && last.is_human_in_the_loop()
            && !last.content.trim().is_empty()
        {
            return last.content.clone();
        }
        let from_progress = match &state.plans_or_histories {
            PlanOrHistory::Plan(_) => state.current_step().map(|s| s.description.clone()),
            PlanOrHistory::History(history) => history.items.last().map(|i| i.content.clone()),
        };
        from_progress
            .filter(|p| !p.trim().is_empty())
            .or_else(|| state.last_message().map(|m| m.content.clone()))
            .unwrap_or_else(|| "Input required".to_string())
    }

    pub fn resume(input: impl Into<String>) -> StateUpdate {
        StateUpdate::from_node(NodeId::Human)
            .with_message(Message::user(input).from_agent(NodeId::Human.as_str()))
    }
}
