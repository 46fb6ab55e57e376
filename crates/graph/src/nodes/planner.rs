//! Planner node: decompose the request into steps.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use snak_core::message::Message;
use snak_core::model::{ModelRequest, ModelTier};
use tracing::{info, warn};

use super::{GraphNode, RunContext, guarded};
use crate::error::GraphError;
use crate::prompt;
use crate::state::{ExecutionState, NodeId, Plan, PlanOrHistory, StateUpdate};

const NODE: NodeId = NodeId::Planner;

#[derive(Debug, Deserialize)]
struct DraftStep {
    description: String,
}

#[derive(Debug, Deserialize)]
struct Draft {
    steps: Vec<DraftStep>,
}

fn plan_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": { "description": { "type": "string" } },
                    "required": ["description"]
                }
            }
        },
        "required": ["steps"]
    })
}

pub struct PlannerNode;

impl PlannerNode {
    async fn draft(&self, ctx: &RunContext<'_>) -> Result<Vec<String>, GraphError> {
        let model = ctx
            .services
            .selector
            .model(ModelTier::Smart)
            .ok_or_else(|| GraphError::structural("no smart model configured for planning"))?;
        let request = ModelRequest::new(prompt::planner_prompt(ctx.config));
        let schema = plan_schema();

        let value = guarded(
            ctx.cancellation(),
            ctx.services.model_timeout(),
            GraphError::ModelTimeout {
                ms: ctx.services.limits.model_timeout_ms,
            },
            async {
                model
                    .invoke_structured(request, &schema)
                    .await
                    .map_err(GraphError::from)
            },
        )
        .await?;

        let draft: Draft = serde_json::from_value(value)
            .map_err(|e| GraphError::structural(format!("plan did not match the schema: {e}")))?;
        Ok(draft
            .steps
            .into_iter()
            .map(|s| s.description.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect())
    }
}

#[async_trait]
impl GraphNode for PlannerNode {
    fn id(&self) -> NodeId {
        NODE
    }

    async fn run(
        &self,
        _state: &ExecutionState,
        ctx: &RunContext<'_>,
    ) -> Result<StateUpdate, GraphError> {
        let descriptions = match self.draft(ctx).await {
            Ok(steps) if !steps.is_empty() => steps,
            Ok(_) => {
                warn!("Planner produced no steps, using the request as a single step");
                vec![ctx.config.user_request.clone()]
            }
            Err(GraphError::Cancelled) => return Err(GraphError::Cancelled),
            Err(e) => {
                warn!("Planning failed, using the request as a single step: {e}");
                vec![ctx.config.user_request.clone()]
            }
        };

        let plan = Plan::from_descriptions(descriptions);
        info!(steps = plan.steps.len(), "Plan created");
        let listing = plan
            .steps
            .iter()
            .map(|s| format!("{}. {}", s.step_number, s.description))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(StateUpdate::from_node(NODE)
            .with_message(
                Message::assistant(format!("Plan:\n{listing}"))
                    .non_final()
                    .from_agent(NODE.as_str()),
            )
            .with_plans_or_histories(PlanOrHistory::Plan(plan))
            .with_step_index(0)
            .with_retry(0))
    }
}
