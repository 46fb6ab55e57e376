//! Validator node: did the last step achieve its goal?

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use snak_core::error::ModelError;
use snak_core::message::{Message, error_tags};
use snak_core::model::{ModelRequest, ModelTier};
use tracing::{debug, info, warn};

use super::{GraphNode, RunContext, guarded};
use crate::error::GraphError;
use crate::prompt;
use crate::state::{ExecutionState, NodeId, PlanOrHistory, StateUpdate, StepStatus};

const NODE: NodeId = NodeId::Validator;

#[derive(Debug, Deserialize)]
struct Verdict {
    success: bool,
    #[serde(default)]
    results: Vec<String>,
}

fn verdict_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "success": { "type": "boolean" },
            "results": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["success", "results"]
    })
}

pub struct ValidatorNode;

impl ValidatorNode {
    /// What the validator is shown about the step under review.
    fn step_context(&self, state: &ExecutionState) -> Result<String, GraphError> {
        match &state.plans_or_histories {
            PlanOrHistory::Plan(plan) => {
                let step = plan.steps.get(state.current_step_index).ok_or_else(|| {
                    GraphError::structural(format!(
                        "no plan step at index {} to validate",
                        state.current_step_index
                    ))
                })?;
                let mut context = format!("Step {}: {}", step.step_number, step.description);
                if let Some(message) = &step.message {
                    context.push_str(&format!("\nResult: {}", message.content));
                }
                for tool in step.tools.iter().flatten() {
                    context.push_str(&format!("\nTool: {}", tool.render()));
                }
                Ok(context)
            }
            PlanOrHistory::History(history) => {
                let item = history
                    .items
                    .last()
                    .ok_or_else(|| GraphError::structural("history is empty, nothing to validate"))?;
                let mut context = format!("Request handled: {}", item.content);
                for tool in item.tools.iter().flatten() {
                    context.push_str(&format!("\nTool: {}", tool.render()));
                }
                Ok(context)
            }
        }
    }

    async fn judge(&self, context: String, ctx: &RunContext<'_>) -> Result<Verdict, GraphError> {
        let model = ctx
            .services
            .selector
            .model(ModelTier::Fast)
            .ok_or_else(|| GraphError::structural("no fast model configured for validation"))?;
        let request = ModelRequest::new(prompt::validator_prompt(&context)).with_temperature(0.0);
        let schema = verdict_schema();

        let reply = guarded(
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
        .await;

        let value = match reply {
            Ok(value) => value,
            Err(GraphError::Model(ModelError::InvalidStructuredOutput(reason))) => {
                warn!("Validator returned malformed output: {reason}");
                return Ok(malformed());
            }
            Err(e) => return Err(e),
        };
        Ok(serde_json::from_value(value).unwrap_or_else(|e| {
            warn!("Validator verdict did not match the schema: {e}");
            malformed()
        }))
    }

    fn failure(&self, state: &ExecutionState, max_retry: u32, reasons: &str) -> StateUpdate {
        let retry = (state.retry + 1).min(max_retry);
        info!(retry, max_retry, "Step failed validation");
        let label = match state.current_step() {
            Some(step) => format!("Step {}", step.step_number),
            None => "The last turn".to_string(),
        };
        StateUpdate::from_node(NODE)
            .with_message(
                Message::assistant(format!("{label} failed validation: {reasons}"))
                    .non_final()
                    .from_agent(NODE.as_str()),
            )
            .with_retry(retry)
    }

    fn success(&self, state: &ExecutionState, summary: &str) -> Result<StateUpdate, GraphError> {
        match &state.plans_or_histories {
            PlanOrHistory::History(_) => {
                let content = state
                    .history()
                    .and_then(|h| h.items.last())
                    .map(|item| item.content.clone())
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| summary.to_string());
                Ok(StateUpdate::from_node(NODE)
                    .with_message(
                        Message::assistant(content)
                            .finalized()
                            .from_agent(NODE.as_str()),
                    )
                    .with_retry(0))
            }
            PlanOrHistory::Plan(plan) => {
                let index = state.current_step_index;
                let mut plan = plan.clone();
                let total = plan.steps.len();
                let step = plan
                    .steps
                    .get_mut(index)
                    .ok_or_else(|| GraphError::structural("validated step disappeared"))?;
                step.status = StepStatus::Completed;
                let number = step.step_number;
                let step_output = step.message.as_ref().map(|m| m.content.clone());

                let message = if index + 1 >= total {
                    info!(steps = total, "Plan completed");
                    let content = step_output
                        .filter(|c| !c.trim().is_empty())
                        .unwrap_or_else(|| format!("All {total} steps completed."));
                    Message::assistant(content).finalized()
                } else {
                    info!(step = number, remaining = total - index - 1, "Step completed");
                    Message::assistant(format!("Step {number} completed: {summary}")).non_final()
                };

                Ok(StateUpdate::from_node(NODE)
                    .with_message(message.from_agent(NODE.as_str()))
                    .with_plans_or_histories(PlanOrHistory::Plan(plan))
                    .with_step_index(index + 1)
                    .with_retry(0))
            }
        }
    }
}

fn malformed() -> Verdict {
    Verdict {
        success: false,
        results: vec!["validator returned malformed output".into()],
    }
}

#[async_trait]
impl GraphNode for ValidatorNode {
    fn id(&self) -> NodeId {
        NODE
    }

    async fn run(
        &self,
        state: &ExecutionState,
        ctx: &RunContext<'_>,
    ) -> Result<StateUpdate, GraphError> {
        let max_retry = ctx.services.limits.max_retry;

        let timed_out = state
            .last_message()
            .and_then(|m| m.error.as_deref())
            .filter(|tag| *tag == error_tags::MODEL_TIMEOUT || *tag == error_tags::TOOL_TIMEOUT);
        if let Some(tag) = timed_out {
            debug!(tag, "Skipping validation of a timed-out step");
            return Ok(self.failure(state, max_retry, &format!("the step did not finish ({tag})")));
        }

        let context = self.step_context(state)?;
        let verdict = self.judge(context, ctx).await?;
        let summary = verdict.results.join("; ");
        if verdict.success {
            self.success(state, &summary)
        } else {
            let reasons = if summary.is_empty() {
                "no reason given".to_string()
            } else {
                summary
            };
            Ok(self.failure(state, max_retry, &reasons))
        }
    }
}
