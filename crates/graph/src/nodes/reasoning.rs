//! Reasoning node: one model turn.

use std::sync::Arc;

use async_trait::async_trait;
use snak_core::agent::ExecutionMode;
use snak_core::error::ModelError;
use snak_core::message::{HUMAN_INPUT_MARKER, Message, MessageToolCall, error_tags, metadata_keys};
use snak_core::model::{ChatModel, ModelRequest, ModelResponse, ModelTier};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{GraphNode, RunContext, call_model, preview};
use crate::error::GraphError;
use crate::prompt::{self, DEGRADED_MESSAGE_CHARS};
use crate::react::parse_react;
use crate::state::{ExecutionState, HistoryItem, NodeId, PlanOrHistory, StateUpdate, StepMessage};

const NODE: NodeId = NodeId::Reasoning;

pub struct ReasoningNode;

/// The message reasoning returns once the step ceiling is hit.
pub fn max_iterations_message(max_graph_steps: u32) -> Message {
    Message::assistant(format!(
        "Reached the maximum of {max_graph_steps} graph steps. Stopping here."
    ))
    .finalized()
    .with_error(error_tags::MAX_ITERATIONS_REACHED)
    .from_agent(NODE.as_str())
}

impl ReasoningNode {
    async fn pick_model(
        &self,
        ctx: &RunContext<'_>,
        instruction: &str,
    ) -> Result<Arc<dyn ChatModel>, GraphError> {
        let selector = &ctx.services.selector;
        if ctx.config.execution_mode == ExecutionMode::Reactive {
            return selector
                .model(ModelTier::Fast)
                .ok_or_else(|| GraphError::structural("no fast model configured"));
        }
        match selector.select_model_for_messages(instruction).await {
            Ok(selected) => {
                debug!(model = %selected.model_name, tier = %selected.tier, "Reasoning model selected");
                Ok(selected.model)
            }
            Err(ModelError::ModelNotFound(reason)) => Err(GraphError::Structural(reason)),
            Err(e) => Err(e.into()),
        }
    }

    /// Invoke with degraded fallbacks for context-window overflows.
    async fn invoke(
        &self,
        state: &ExecutionState,
        ctx: &RunContext<'_>,
        model: &Arc<dyn ChatModel>,
        instruction: &str,
    ) -> Result<ModelResponse, GraphError> {
        let services = ctx.services;
        let tools = services.tools.definitions();

        let memory = match services
            .memory
            .context(&ctx.config.agent_config.id, instruction)
            .await
        {
            Ok(memory) => Some(memory),
            Err(e) => {
                warn!("Memory recall failed: {e}");
                None
            }
        };

        let full = prompt::reasoning_prompt(state, ctx.config, memory.as_ref(), instruction, None);
        let request = ModelRequest::new(full).with_tools(tools.clone());
        match call_model(ctx, NODE, model, request).await {
            Err(GraphError::Model(e)) if e.is_context_length() => {
                warn!("Context length exceeded, retrying with clipped messages");
            }
            other => return other,
        }

        let clipped = prompt::reasoning_prompt(
            state,
            ctx.config,
            None,
            instruction,
            Some((services.tokenizer.as_ref(), DEGRADED_MESSAGE_CHARS)),
        );
        let request = ModelRequest::new(clipped).with_tools(tools.clone());
        match call_model(ctx, NODE, model, request).await {
            Err(GraphError::Model(e)) if e.is_context_length() => {
                warn!("Context length still exceeded, falling back to a minimal prompt");
            }
            other => return other,
        }

        let minimal = prompt::minimal_prompt(ctx.config, instruction);
        call_model(ctx, NODE, model, ModelRequest::new(minimal).with_tools(tools)).await
    }

    fn interpret(&self, mut message: Message, ctx: &RunContext<'_>) -> Message {
        message = message.from_agent(NODE.as_str());

        if ctx.config.is_react() {
            let parsed = parse_react(&message.content);
            if !message.has_tool_calls()
                && let Some(action) = parsed.action
            {
                debug!(tool = %action.tool, "Recovered tool call from ReAct text");
                message.tool_calls = vec![MessageToolCall {
                    id: format!("react_{}", Uuid::new_v4()),
                    name: action.tool,
                    arguments: action.input.to_string(),
                }];
            }
            if !message.has_tool_calls() && parsed.final_answer.is_some() {
                message = message.finalized();
            }
        }

        if ctx.config.is_hybrid() && message.content.contains(HUMAN_INPUT_MARKER) {
            message = message.with_metadata(metadata_keys::HUMAN_IN_THE_LOOP, true.into());
        }
        message
    }
}

#[async_trait]
impl GraphNode for ReasoningNode {
    fn id(&self) -> NodeId {
        NODE
    }

    async fn run(
        &self,
        state: &ExecutionState,
        ctx: &RunContext<'_>,
    ) -> Result<StateUpdate, GraphError> {
        let config = ctx.config;
        if state.current_graph_step >= config.max_graph_steps {
            warn!(
                step = state.current_graph_step,
                max = config.max_graph_steps,
                "Graph step ceiling reached"
            );
            return Ok(StateUpdate::from_node(NODE)
                .with_message(max_iterations_message(config.max_graph_steps)));
        }

        let instruction = prompt::step_instruction(state, config)?;
        let model = self.pick_model(ctx, &instruction).await?;
        let response = self.invoke(state, ctx, &model, &instruction).await?;

        let services = ctx.services;
        let prompt_tokens = response.usage.map(|u| u.prompt_tokens as u64).unwrap_or(0);
        let tokens = response
            .usage
            .map(|u| u.completion_tokens as usize)
            .unwrap_or_else(|| services.tokenizer.estimate_tokens(&response.message.content));
        services.tracker.record_model(prompt_tokens, tokens as u64);

        let message = self
            .interpret(response.message, ctx)
            .with_metadata(metadata_keys::TOKENS, tokens.into());
        info!(
            model = %response.model,
            tool_calls = message.tool_calls.len(),
            is_final = message.is_final.unwrap_or(false),
            output = %preview(&message.content, 200),
            "Reasoning turn complete"
        );

        let content = message.content.clone();
        let progress = match &state.plans_or_histories {
            PlanOrHistory::Plan(plan) => {
                let mut plan = plan.clone();
                let step = plan.steps.get_mut(state.current_step_index).ok_or_else(|| {
                    GraphError::structural("current plan step disappeared during reasoning")
                })?;
                step.message = Some(StepMessage { content, tokens });
                PlanOrHistory::Plan(plan)
            }
            PlanOrHistory::History(history) => {
                let mut history = history.clone();
                history.items.push(HistoryItem::message(content, tokens));
                PlanOrHistory::History(history)
            }
        };

        Ok(StateUpdate::from_node(NODE)
            .with_message(message)
            .with_plans_or_histories(progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snak_core::agent::{AgentConfig, AgentMode};
    use snak_core::tool::ToolRegistry;

    use crate::config::RunConfig;
    use crate::state::Plan;
    use crate::test_helpers::*;

    fn run_config(mode: AgentMode, execution_mode: ExecutionMode) -> RunConfig {
        RunConfig::new(
            AgentConfig {
                mode,
                ..AgentConfig::default()
            },
            "what is my balance",
        )
        .with_execution_mode(execution_mode)
    }

    fn planning_state() -> ExecutionState {
        let mut state = ExecutionState::new(ExecutionMode::Planning, vec![Message::user("go")]);
        state.plans_or_histories = PlanOrHistory::Plan(Plan::from_descriptions(["read balance"]));
        state
    }

    #[tokio::test]
    async fn ceiling_short_circuit_is_idempotent_and_skips_selector() {
        let fast = SequentialMockModel::new("fast", vec![]);
        let smart = SequentialMockModel::new("smart", vec![]);
        let selector = MockSelector::new(fast.clone(), smart.clone());
        let services = services(selector.clone(), Arc::new(ToolRegistry::new()));
        let config = run_config(AgentMode::Autonomous, ExecutionMode::Planning).with_max_graph_steps(5);
        let mut state = planning_state();
        state.current_graph_step = 5;

        let ctx = RunContext::new(&services, &config);
        let first = ReasoningNode.run(&state, &ctx).await.unwrap();
        let second = ReasoningNode.run(&state, &ctx).await.unwrap();

        for update in [&first, &second] {
            let msg = &update.messages[0];
            assert_eq!(msg.error.as_deref(), Some(error_tags::MAX_ITERATIONS_REACHED));
            assert_eq!(msg.is_final, Some(true));
            assert_eq!(msg.content, first.messages[0].content);
            assert!(update.plans_or_histories.is_none());
        }
        assert_eq!(selector.select_calls(), 0);
        assert_eq!(fast.call_count() + smart.call_count(), 0);
    }

    #[tokio::test]
    async fn planning_records_step_message() {
        let fast = SequentialMockModel::new("fast", vec![]);
        let smart = SequentialMockModel::new("smart", vec![Reply::text("Balance is 42")]);
        let selector = MockSelector::new(fast, smart.clone());
        let services = services(selector.clone(), Arc::new(ToolRegistry::new()));
        let config = run_config(AgentMode::Autonomous, ExecutionMode::Planning);
        let state = planning_state();

        let update = ReasoningNode
            .run(&state, &RunContext::new(&services, &config))
            .await
            .unwrap();

        assert_eq!(selector.select_calls(), 1);
        assert_eq!(update.messages[0].from.as_deref(), Some("reasoning"));
        let Some(PlanOrHistory::Plan(plan)) = update.plans_or_histories else {
            panic!("expected a plan");
        };
        assert_eq!(plan.steps[0].message.as_ref().unwrap().content, "Balance is 42");
        assert_eq!(services.tracker.totals().completion_tokens, 5);
    }

    #[tokio::test]
    async fn react_final_answer_marks_message_final() {
        let fast = SequentialMockModel::new(
            "fast",
            vec![Reply::text("Thought: I know this\nFinal Answer: done")],
        );
        let selector = MockSelector::new(fast, SequentialMockModel::new("smart", vec![]));
        let services = services(selector, Arc::new(ToolRegistry::new()));
        let config = run_config(AgentMode::Interactive, ExecutionMode::Reactive);
        let state = ExecutionState::new(ExecutionMode::Reactive, vec![Message::user("q")]);

        let update = ReasoningNode
            .run(&state, &RunContext::new(&services, &config))
            .await
            .unwrap();
        assert_eq!(update.messages[0].is_final, Some(true));
        let Some(PlanOrHistory::History(history)) = update.plans_or_histories else {
            panic!("expected a history");
        };
        assert_eq!(history.items.len(), 1);
    }

    #[tokio::test]
    async fn react_action_becomes_tool_call() {
        let fast = SequentialMockModel::new(
            "fast",
            vec![Reply::text(
                "Thought: need balance\nAction: get_balance\nAction Input: {\"account\": \"main\"}",
            )],
        );
        let selector = MockSelector::new(fast, SequentialMockModel::new("smart", vec![]));
        let services = services(selector, Arc::new(ToolRegistry::new()));
        let config = run_config(AgentMode::Interactive, ExecutionMode::Reactive);
        let state = ExecutionState::new(ExecutionMode::Reactive, vec![Message::user("q")]);

        let update = ReasoningNode
            .run(&state, &RunContext::new(&services, &config))
            .await
            .unwrap();
        let msg = &update.messages[0];
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].name, "get_balance");
        assert!(msg.is_final.is_none());
    }

    #[tokio::test]
    async fn structured_tool_calls_take_precedence_over_react_text() {
        let fast = SequentialMockModel::new(
            "fast",
            vec![Reply::tool_calls(
                "Action: other_tool\nAction Input: {}\nFinal Answer: nope",
                vec![make_tool_call("get_balance", serde_json::json!({}))],
            )],
        );
        let selector = MockSelector::new(fast, SequentialMockModel::new("smart", vec![]));
        let services = services(selector, Arc::new(ToolRegistry::new()));
        let config = run_config(AgentMode::Interactive, ExecutionMode::Reactive);
        let state = ExecutionState::new(ExecutionMode::Reactive, vec![Message::user("q")]);

        let update = ReasoningNode
            .run(&state, &RunContext::new(&services, &config))
            .await
            .unwrap();
        let msg = &update.messages[0];
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].name, "get_balance");
        assert!(msg.is_final.is_none());
    }

    #[tokio::test]
    async fn hybrid_marker_flags_human_in_the_loop() {
        let smart = SequentialMockModel::new(
            "smart",
            vec![Reply::text("Which account? WAITING_FOR_HUMAN_INPUT")],
        );
        let selector = MockSelector::new(SequentialMockModel::new("fast", vec![]), smart);
        let services = services(selector, Arc::new(ToolRegistry::new()));
        let config = run_config(AgentMode::Hybrid, ExecutionMode::Planning);

        let update = ReasoningNode
            .run(&planning_state(), &RunContext::new(&services, &config))
            .await
            .unwrap();
        assert!(update.messages[0].is_human_in_the_loop());
    }

    #[tokio::test]
    async fn context_length_errors_degrade_then_succeed() {
        let overflow = || {
            Reply::Error(ModelError::ApiError {
                status_code: 400,
                message: "This model's maximum context length is 8192 tokens".into(),
            })
        };
        let smart = SequentialMockModel::new(
            "smart",
            vec![overflow(), overflow(), Reply::text("did one thing")],
        );
        let selector = MockSelector::new(SequentialMockModel::new("fast", vec![]), smart.clone());
        let services = services(selector, Arc::new(ToolRegistry::new()));
        let config = run_config(AgentMode::Autonomous, ExecutionMode::Planning);

        let update = ReasoningNode
            .run(&planning_state(), &RunContext::new(&services, &config))
            .await
            .unwrap();
        assert_eq!(update.messages[0].content, "did one thing");
        assert_eq!(smart.call_count(), 3);
        let last_request = smart.requests().pop().unwrap();
        assert_eq!(last_request.messages.len(), 2);
    }

    #[tokio::test]
    async fn other_model_errors_propagate() {
        let smart = SequentialMockModel::new(
            "smart",
            vec![Reply::Error(ModelError::AuthenticationFailed("bad key".into()))],
        );
        let selector = MockSelector::new(SequentialMockModel::new("fast", vec![]), smart);
        let services = services(selector, Arc::new(ToolRegistry::new()));
        let config = run_config(AgentMode::Autonomous, ExecutionMode::Planning);

        let err = ReasoningNode
            .run(&planning_state(), &RunContext::new(&services, &config))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Model(ModelError::AuthenticationFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn model_timeout_is_reported() {
        let smart = SequentialMockModel::new("smart", vec![Reply::Hang]);
        let selector = MockSelector::new(SequentialMockModel::new("fast", vec![]), smart);
        let services = services(selector, Arc::new(ToolRegistry::new()));
        let config = run_config(AgentMode::Autonomous, ExecutionMode::Planning);

        let err = ReasoningNode
            .run(&planning_state(), &RunContext::new(&services, &config))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::ModelTimeout { ms: 45_000 }));
    }
}
