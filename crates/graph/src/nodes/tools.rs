//! Tool-execution node.
//!
//! Runs every tool call of the last reasoning message as one batch under
//! the tool timeout, bounds the combined output, and folds the results
//! into the active plan step or history item.

use std::time::Instant;

use async_trait::async_trait;
use snak_core::message::{Message, error_tags};
use snak_core::tool::{ToolCall, ToolOutput};
use tracing::{info, warn};

use super::{GraphNode, RunContext, guarded, preview};
use crate::error::GraphError;
use crate::state::{ExecutionState, HistoryItem, NodeId, PlanOrHistory, StateUpdate, ToolRecord};

const NODE: NodeId = NodeId::Tools;

pub struct ToolsNode;

impl ToolsNode {
    async fn execute_batch(
        &self,
        calls: &[ToolCall],
        ctx: &RunContext<'_>,
    ) -> Result<Vec<ToolOutput>, GraphError> {
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            outputs.push(ctx.services.tools.execute(call).await?);
        }
        Ok(outputs)
    }

    /// Render one output within its share of the output budget.
    fn bounded_message(
        &self,
        call: &ToolCall,
        output: &ToolOutput,
        budget: usize,
        ctx: &RunContext<'_>,
    ) -> Message {
        let rendered = output.render();
        let message = match ctx.services.tokenizer.truncate(&rendered, budget) {
            Ok(content) => Message::tool_result(&call.id, content),
            Err(e) => {
                warn!(tool = %call.name, "Tool output truncation failed: {e}");
                Message::tool_result(
                    &call.id,
                    format!(
                        "Tool {} returned {} characters, which could not be reduced to fit the context.",
                        call.name,
                        rendered.chars().count()
                    ),
                )
                .with_error(error_tags::EXECUTION_ERROR)
            }
        };
        message.from_agent(NODE.as_str())
    }
}

#[async_trait]
impl GraphNode for ToolsNode {
    fn id(&self) -> NodeId {
        NODE
    }

    async fn run(
        &self,
        state: &ExecutionState,
        ctx: &RunContext<'_>,
    ) -> Result<StateUpdate, GraphError> {
        let last = state
            .last_message()
            .filter(|m| m.has_tool_calls())
            .ok_or_else(|| GraphError::structural("tools node reached without pending tool calls"))?;
        let calls: Vec<ToolCall> = last.tool_calls.iter().map(ToolCall::from).collect();

        for call in &calls {
            info!(
                tool = %call.name,
                args = %preview(&call.arguments.to_string(), 200),
                "Executing tool"
            );
        }

        let services = ctx.services;
        let started = Instant::now();
        let outputs = guarded(
            ctx.cancellation(),
            services.tool_timeout(),
            GraphError::ToolTimeout {
                ms: services.limits.tool_timeout_ms,
            },
            self.execute_batch(&calls, ctx),
        )
        .await
        .inspect_err(|e| {
            if e.is_timeout() {
                warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "[TIMEOUT] Tool execution exceeded its budget"
                );
            }
        })?;

        let budget = services.limits.tool_output_max_chars / calls.len().max(1);
        let mut update = StateUpdate::from_node(NODE);
        let mut records = Vec::with_capacity(calls.len());
        for (call, output) in calls.iter().zip(&outputs) {
            let message = self.bounded_message(call, output, budget, ctx);
            let tokens = services.tokenizer.estimate_tokens(&message.content);
            services.tracker.record_tool(tokens as u64);
            records.push(ToolRecord {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                result: message.content.clone(),
                tokens,
            });
            update = update.with_message(message);
        }
        info!(
            tools = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool batch complete"
        );

        let progress = match &state.plans_or_histories {
            PlanOrHistory::Plan(plan) => {
                let mut plan = plan.clone();
                let step = plan.steps.get_mut(state.current_step_index).ok_or_else(|| {
                    GraphError::structural(format!(
                        "no plan step at index {} for tool results",
                        state.current_step_index
                    ))
                })?;
                step.tools.get_or_insert_with(Vec::new).extend(records);
                PlanOrHistory::Plan(plan)
            }
            PlanOrHistory::History(history) => {
                let mut history = history.clone();
                match history.items.last_mut() {
                    Some(item) => {
                        if ctx.config.is_react() {
                            for record in &records {
                                item.content
                                    .push_str(&format!("\nObservation: {}", record.result));
                            }
                        }
                        item.tokens += records.iter().map(|r| r.tokens).sum::<usize>();
                        item.tools.get_or_insert_with(Vec::new).extend(records);
                    }
                    None => history.items.push(HistoryItem::tools(records)),
                }
                PlanOrHistory::History(history)
            }
        };
        Ok(update.with_plans_or_histories(progress))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use snak_config::GraphConfig;
    use snak_core::agent::{AgentConfig, AgentMode, ExecutionMode};
    use snak_core::error::ToolError;

    use crate::config::RunConfig;
    use crate::nodes::GraphServices;
    use crate::state::Plan;
    use crate::test_helpers::*;

    fn graph_services(tools: Arc<snak_core::tool::ToolRegistry>) -> GraphServices {
        let selector = MockSelector::new(
            SequentialMockModel::new("fast", vec![]),
            SequentialMockModel::new("smart", vec![]),
        );
        services(selector, tools)
    }

    fn planning_state_with_call(name: &str) -> ExecutionState {
        let mut state = ExecutionState::new(ExecutionMode::Planning, vec![Message::user("go")]);
        state.plans_or_histories = PlanOrHistory::Plan(Plan::from_descriptions(["read balance"]));
        state.messages.push(
            Message::assistant("")
                .with_tool_calls(vec![make_tool_call(name, serde_json::json!({"account": "main"}))]),
        );
        state
    }

    fn autonomous() -> RunConfig {
        RunConfig::new(
            AgentConfig {
                mode: AgentMode::Autonomous,
                ..AgentConfig::default()
            },
            "go",
        )
        .with_execution_mode(ExecutionMode::Planning)
    }

    #[tokio::test]
    async fn results_fold_into_current_step() {
        let services = graph_services(registry(vec![balance_tool()]));
        let config = autonomous();
        let state = planning_state_with_call("get_balance");

        let update = ToolsNode
            .run(&state, &RunContext::new(&services, &config))
            .await
            .unwrap();

        assert_eq!(update.messages.len(), 1);
        assert_eq!(update.messages[0].content, "42 STRK");
        assert_eq!(update.messages[0].from.as_deref(), Some("tools"));
        assert_eq!(update.messages[0].tool_call_id.as_deref(), Some("call_get_balance"));
        let Some(PlanOrHistory::Plan(plan)) = update.plans_or_histories else {
            panic!("expected a plan");
        };
        let tools = plan.steps[0].tools.as_ref().unwrap();
        assert_eq!(tools[0].name, "get_balance");
        assert_eq!(tools[0].result, "42 STRK");
        assert!(services.tracker.totals().tool_tokens > 0);
    }

    #[tokio::test]
    async fn oversized_output_is_truncated() {
        let big: Arc<dyn snak_core::tool::Tool> = Arc::new(StaticTool {
            name: "dump",
            output: "x".repeat(500),
            delay: None,
        });
        let services = graph_services(registry(vec![big])).with_limits(GraphConfig {
            tool_output_max_chars: 100,
            ..GraphConfig::default()
        });
        let config = autonomous();
        let state = planning_state_with_call("dump");

        let update = ToolsNode
            .run(&state, &RunContext::new(&services, &config))
            .await
            .unwrap();
        let content = &update.messages[0].content;
        assert!(content.chars().count() <= 100);
        assert!(content.ends_with("[output truncated]"));
    }

    #[tokio::test]
    async fn failed_truncation_becomes_error_message() {
        let big: Arc<dyn snak_core::tool::Tool> = Arc::new(StaticTool {
            name: "dump",
            output: "x".repeat(500),
            delay: None,
        });
        let services = graph_services(registry(vec![big])).with_limits(GraphConfig {
            tool_output_max_chars: 5,
            ..GraphConfig::default()
        });
        let config = autonomous();
        let state = planning_state_with_call("dump");

        let update = ToolsNode
            .run(&state, &RunContext::new(&services, &config))
            .await
            .unwrap();
        let msg = &update.messages[0];
        assert_eq!(msg.error.as_deref(), Some(error_tags::EXECUTION_ERROR));
        assert!(msg.content.contains("could not be reduced"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_distinctly() {
        let slow: Arc<dyn snak_core::tool::Tool> = Arc::new(StaticTool {
            name: "slow",
            output: "late".into(),
            delay: Some(Duration::from_secs(60)),
        });
        let services = graph_services(registry(vec![slow]));
        let config = autonomous();
        let state = planning_state_with_call("slow");

        let err = ToolsNode
            .run(&state, &RunContext::new(&services, &config))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::ToolTimeout { ms: 30_000 }));
    }

    #[tokio::test]
    async fn tool_errors_propagate() {
        let services = graph_services(registry(vec![Arc::new(FailingTool)]));
        let config = autonomous();
        let state = planning_state_with_call("transfer");

        let err = ToolsNode
            .run(&state, &RunContext::new(&services, &config))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::ToolExecution(ToolError::ExecutionFailed { .. })
        ));
        assert!(!err.is_handled());
    }

    #[tokio::test]
    async fn react_mode_appends_observation() {
        let services = graph_services(registry(vec![balance_tool()]));
        let config = RunConfig::new(AgentConfig::default(), "balance?");
        let mut state = ExecutionState::new(ExecutionMode::Reactive, vec![Message::user("balance?")]);
        state.plans_or_histories = PlanOrHistory::History(crate::state::History {
            items: vec![HistoryItem::message("Thought: check it", 3)],
        });
        state.messages.push(
            Message::assistant("Thought: check it")
                .with_tool_calls(vec![make_tool_call("get_balance", serde_json::json!({}))]),
        );

        let update = ToolsNode
            .run(&state, &RunContext::new(&services, &config))
            .await
            .unwrap();
        let Some(PlanOrHistory::History(history)) = update.plans_or_histories else {
            panic!("expected a history");
        };
        assert_eq!(history.items.len(), 1);
        assert!(history.items[0].content.ends_with("Observation: 42 STRK"));
        assert_eq!(history.items[0].tools.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_tool_calls_is_structural() {
        let services = graph_services(registry(vec![]));
        let config = autonomous();
        let state = ExecutionState::new(ExecutionMode::Planning, vec![Message::assistant("no calls")]);

        let err = ToolsNode
            .run(&state, &RunContext::new(&services, &config))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Structural(_)));
    }
}
