//! Terminal node: discard progress, make sure the run ends on a final message.

use async_trait::async_trait;
use snak_core::message::{Message, error_tags, is_final_message};
use tracing::info;

use super::{GraphNode, RunContext};
use crate::error::GraphError;
use crate::state::{ExecutionState, NodeId, PlanOrHistory, StateUpdate};

const NODE: NodeId = NodeId::EndGraph;

pub struct EndGraphNode;

#[async_trait]
impl GraphNode for EndGraphNode {
    fn id(&self) -> NodeId {
        NODE
    }

    async fn run(
        &self,
        state: &ExecutionState,
        ctx: &RunContext<'_>,
    ) -> Result<StateUpdate, GraphError> {
        let mode = state.plans_or_histories.mode();
        let mut update = StateUpdate::from_node(NODE)
            .with_plans_or_histories(PlanOrHistory::empty_for(mode))
            .with_step_index(0)
            .with_retry(0);

        let ended_final = state.last_message().is_some_and(is_final_message);
        if !ended_final {
            let max_retry = ctx.services.limits.max_retry;
            let (tag, content) = if state.retry >= max_retry {
                (
                    error_tags::MAX_RETRIES_REACHED,
                    format!("Stopped after {max_retry} failed attempts at the current step."),
                )
            } else {
                (
                    error_tags::MAX_ITERATIONS_REACHED,
                    format!(
                        "Stopped after {} graph steps without a final answer.",
                        state.current_graph_step
                    ),
                )
            };
            update = update.with_message(
                Message::assistant(content)
                    .finalized()
                    .with_error(tag)
                    .from_agent(NODE.as_str()),
            );
        }

        info!(
            graph_steps = state.current_graph_step,
            ended_final, "Executor graph finished"
        );
        Ok(update)
    }
}
