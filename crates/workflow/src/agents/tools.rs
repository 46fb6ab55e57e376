//! The tool-executing workflow agent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use snak_config::GraphConfig;
use snak_core::message::{Message, error_tags};
use snak_core::token::{HeuristicTokenizer, TokenEstimator};
use snak_core::tool::{ToolCall, ToolRegistry};
use tracing::{info, warn};

use crate::agent::{AgentContext, AgentKind, AgentOutput, TOOLS_AGENT_ID, WorkflowAgent};
use crate::error::WorkflowError;
use crate::state::WorkflowState;

/// Runs the pending tool calls of the last message, one result message per
/// call. Failures and timeouts are reported as tool messages, not errors.
pub struct ToolsAgent {
    tools: Arc<ToolRegistry>,
    tokenizer: Arc<dyn TokenEstimator>,
    limits: GraphConfig,
}

impl ToolsAgent {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            tokenizer: Arc::new(HeuristicTokenizer),
            limits: GraphConfig::default(),
        }
    }

    pub fn with_limits(mut self, limits: GraphConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn TokenEstimator>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    async fn run_call(&self, call: ToolCall, budget: usize) -> Message {
        let ms = self.limits.tool_timeout_ms;
        let outcome = tokio::time::timeout(Duration::from_millis(ms), self.tools.execute(&call)).await;
        let message = match outcome {
            Ok(Ok(output)) => match self.tokenizer.truncate(&output.render(), budget) {
                Ok(content) => Message::tool_result(&call.id, content),
                Err(e) => {
                    warn!(tool = %call.name, "Tool output truncation failed: {e}");
                    Message::tool_result(
                        &call.id,
                        format!("Tool {} returned more output than fits the context.", call.name),
                    )
                    .with_error(error_tags::EXECUTION_ERROR)
                }
            },
            Ok(Err(e)) => {
                warn!(tool = %call.name, "Tool failed: {e}");
                Message::tool_result(&call.id, format!("Tool {} failed: {e}", call.name))
                    .with_error(error_tags::EXECUTION_ERROR)
            }
            Err(_) => {
                warn!(tool = %call.name, timeout_ms = ms, "[TIMEOUT] Tool execution exceeded its budget");
                Message::tool_result(&call.id, format!("Tool {} timed out after {ms}ms", call.name))
                    .with_error(error_tags::TOOL_TIMEOUT)
            }
        };
        message.from_agent(TOOLS_AGENT_ID)
    }
}

#[async_trait]
impl WorkflowAgent for ToolsAgent {
    fn id(&self) -> &str {
        TOOLS_AGENT_ID
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Tools
    }

    fn description(&self) -> &str {
        "Executes tool calls requested by other agents"
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        _ctx: &AgentContext<'_>,
    ) -> Result<AgentOutput, WorkflowError> {
        if state.tool_calls.is_empty() {
            return Err(WorkflowError::agent(TOOLS_AGENT_ID, "no pending tool calls"));
        }
        let budget = self.limits.tool_output_max_chars / state.tool_calls.len();

        let mut messages = Vec::with_capacity(state.tool_calls.len());
        for call in &state.tool_calls {
            info!(tool = %call.name, "Executing tool for workflow");
            messages.push(self.run_call(ToolCall::from(call), budget).await);
        }
        Ok(AgentOutput::Messages(messages))
    }
}
