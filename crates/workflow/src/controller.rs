//! The workflow controller: schedules whole agents under one router.

use std::sync::Arc;
use std::time::{Duration, Instant};

use snak_config::WorkflowConfig;
use snak_core::checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore, RunStatus};
use snak_core::error::CheckpointError;
use snak_core::message::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::{AgentContext, AgentInfo, AgentKind, Roster, WorkflowAgent};
use crate::error::WorkflowError;
use crate::node::{NodeLimits, run_agent};
use crate::router;
use crate::state::{Target, WorkflowState};

pub struct WorkflowController {
    agents: Vec<Arc<dyn WorkflowAgent>>,
    roster: Vec<AgentInfo>,
    config: WorkflowConfig,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl WorkflowController {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            agents: Vec::new(),
            roster: Vec::new(),
            config,
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
        }
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    /// Add an agent. A later registration replaces an earlier one with the
    /// same id.
    pub fn register(mut self, agent: Arc<dyn WorkflowAgent>) -> Self {
        let info = AgentInfo {
            id: agent.id().to_string(),
            kind: agent.kind(),
            description: agent.description().to_string(),
        };
        if let Some(pos) = self.roster.iter().position(|a| a.id == info.id) {
            warn!(agent = %info.id, "Replacing registered agent");
            self.roster[pos] = info;
            self.agents[pos] = agent;
        } else {
            debug!(agent = %info.id, kind = ?info.kind, "Agent registered");
            self.roster.push(info);
            self.agents.push(agent);
        }
        self
    }

    pub fn roster(&self) -> &[AgentInfo] {
        &self.roster
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    fn agent(&self, id: &str) -> Option<&Arc<dyn WorkflowAgent>> {
        self.agents.iter().find(|a| a.id() == id)
    }

    /// Supervisor first, else the first specialized agent, else whatever
    /// was registered first.
    pub fn entry_agent(&self) -> Result<Target, WorkflowError> {
        let roster = self.roster.as_slice();
        roster
            .first_of(AgentKind::Supervisor)
            .or_else(|| roster.first_of(AgentKind::Executor))
            .or_else(|| roster.first())
            .map(|a| Target::agent(a.id.clone()))
            .ok_or(WorkflowError::NoAgents)
    }

    /// Run one request through the agents under the workflow timeout.
    ///
    /// With checkpointing on, a `thread_id` continues the conversation stored
    /// under it; a run that ended on a clarification request resumes at the
    /// agent that asked.
    pub async fn execute(
        &self,
        input: &str,
        thread_id: Option<&str>,
    ) -> Result<WorkflowState, WorkflowError> {
        let thread_id = thread_id
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let ms = self.config.timeout_ms;

        match tokio::time::timeout(Duration::from_millis(ms), self.run(input, &thread_id)).await {
            Ok(result) => result,
            Err(_) => {
                error!(thread_id = %thread_id, timeout_ms = ms, "Workflow execution timed out");
                Err(WorkflowError::Timeout { ms })
            }
        }
    }

    /// Drop every stored workflow checkpoint.
    pub async fn reset_checkpoints(&self) -> Result<(), WorkflowError> {
        self.checkpoints.clear().await?;
        info!("Workflow checkpoints cleared");
        Ok(())
    }

    async fn run(&self, input: &str, thread_id: &str) -> Result<WorkflowState, WorkflowError> {
        let mut state = self.initial_state(input, thread_id).await?;
        let limits = NodeLimits {
            max_iterations: self.config.max_iterations,
            max_consecutive_calls: self.config.max_consecutive_agent_calls,
        };
        info!(
            thread_id,
            entry = %state.current_agent,
            agents = self.agents.len(),
            "Workflow run starting"
        );

        let mut next = state.current_agent.clone();
        while let Target::Agent(id) = next {
            let agent = self
                .agent(&id)
                .ok_or_else(|| WorkflowError::UnknownAgent(id.clone()))?;
            state.current_agent = Target::Agent(id.clone());

            let ctx = AgentContext {
                roster: &self.roster,
                thread_id,
            };
            let started = Instant::now();
            let update = run_agent(agent.as_ref(), &state, &ctx, limits).await;
            state.apply(update);

            next = router::route(&state, &self.roster, self.config.max_iterations);
            info!(
                thread_id,
                agent = %id,
                next = %next,
                iteration = state.iteration_count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Workflow transition"
            );
            if next.is_end() {
                state.current_agent = Target::End;
            } else {
                self.save(thread_id, RunStatus::Running, &state).await?;
            }
        }

        let status = if state.metadata.waiting_for_input {
            RunStatus::AwaitingInput {
                prompt: state
                    .last_message()
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
            }
        } else {
            RunStatus::Completed
        };
        self.save(thread_id, status, &state).await?;
        info!(
            thread_id,
            iterations = state.iteration_count,
            waiting_for_input = state.metadata.waiting_for_input,
            "Workflow run complete"
        );
        Ok(state)
    }

    async fn initial_state(
        &self,
        input: &str,
        thread_id: &str,
    ) -> Result<WorkflowState, WorkflowError> {
        let entry = self.entry_agent()?;
        if !self.config.checkpointing {
            return Ok(WorkflowState::new(input, entry));
        }
        let Some(checkpoint) = self.checkpoints.get(thread_id).await? else {
            return Ok(WorkflowState::new(input, entry));
        };

        let mut state: WorkflowState = checkpoint.decode()?;
        debug!(thread_id, messages = state.messages.len(), "Continuing stored workflow");
        state.messages.push(Message::user(input));
        state.error = None;
        state.iteration_count = 0;
        state.tool_calls.clear();
        state.metadata.agent_history.clear();
        state.metadata.selected_agent = None;

        let resume_at = state
            .metadata
            .active_agent
            .as_deref()
            .filter(|_| state.metadata.waiting_for_input)
            .and_then(|id| self.roster.find(id))
            .map(|a| Target::agent(a.id.clone()));
        match resume_at {
            Some(agent) => {
                info!(thread_id, agent = %agent, "Resuming after clarification");
                state.current_agent = agent;
            }
            None => {
                state.metadata.original_user_query = Some(input.to_string());
                state.current_agent = entry;
            }
        }
        state.metadata.waiting_for_input = false;
        Ok(state)
    }

    async fn save(
        &self,
        thread_id: &str,
        status: RunStatus,
        state: &WorkflowState,
    ) -> Result<(), WorkflowError> {
        if !self.config.checkpointing {
            return Ok(());
        }
        let value = serde_json::to_value(state).map_err(|e| CheckpointError::Corrupt {
            thread_id: thread_id.to_string(),
            reason: e.to_string(),
        })?;
        self.checkpoints
            .put(Checkpoint::new(thread_id, status, value))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use snak_core::message::{MessageToolCall, error_tags, metadata_keys};

    use crate::agent::AgentOutput;
    use crate::test_helpers::*;

    fn config() -> WorkflowConfig {
        WorkflowConfig::default()
    }

    fn tool_call() -> MessageToolCall {
        MessageToolCall {
            id: "c1".into(),
            name: "get_balance".into(),
            arguments: "{}".into(),
        }
    }

    #[tokio::test]
    async fn repeated_worker_is_stopped_on_fourth_call() {
        let asks_tools = || Ok(AgentOutput::Single(Message::assistant("").with_tool_calls(vec![tool_call()])));
        let tool_result = || Ok(AgentOutput::Messages(vec![Message::tool_result("c1", "42")]));
        let worker = ScriptedAgent::new(
            "worker",
            AgentKind::Executor,
            vec![asks_tools(), asks_tools(), asks_tools()],
        );
        let tools = ScriptedAgent::new(
            "tools",
            AgentKind::Tools,
            vec![tool_result(), tool_result(), tool_result()],
        );
        let controller = WorkflowController::new(config())
            .register(worker.clone())
            .register(tools.clone());

        let state = controller.execute("check balance", None).await.unwrap();
        assert_eq!(state.current_agent, Target::End);
        let last = state.last_message().unwrap();
        assert_eq!(last.error.as_deref(), Some(error_tags::REPEATED_AGENT_CALLS));
        assert_eq!(last.from.as_deref(), Some("worker"));
        assert_eq!(worker.calls(), 3);
        assert_eq!(tools.calls(), 3);
        assert_eq!(state.iteration_count, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_agent_times_out() {
        let controller = WorkflowController::new(WorkflowConfig {
            timeout_ms: 100,
            ..config()
        })
        .register(Arc::new(PendingAgent));

        let err = controller.execute("anything", None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Timeout { ms: 100 }));
        assert!(err.to_string().contains("timed out after 100ms"));
    }

    #[tokio::test]
    async fn supervisor_delegates_then_ends() {
        let supervisor = ScriptedAgent::new(
            "supervisor",
            AgentKind::Supervisor,
            vec![Ok(AgentOutput::Envelope {
                messages: vec![Message::assistant("analyst, check the pool")],
                next_agent: Some("analyst".into()),
                is_final: false,
            })],
        );
        let analyst = ScriptedAgent::new(
            "analyst",
            AgentKind::Executor,
            vec![Ok(AgentOutput::Text("pool is healthy".into()))],
        );
        let controller = WorkflowController::new(config())
            .register(analyst.clone())
            .register(supervisor.clone());

        let state = controller.execute("how is the pool?", None).await.unwrap();
        let from: Vec<_> = state.messages.iter().map(|m| m.from.clone()).collect();
        assert_eq!(
            from,
            vec![None, Some("supervisor".to_string()), Some("analyst".to_string())]
        );
        assert_eq!(state.response(), Some("pool is healthy"));
        assert_eq!(
            state.metadata.agent_history,
            vec!["supervisor".to_string(), "analyst".to_string()]
        );
    }

    #[tokio::test]
    async fn iteration_ceiling_ends_ping_pong_with_tagged_message() {
        let bounce = || {
            Ok(AgentOutput::Single(
                Message::assistant("still working").non_final(),
            ))
        };
        let delegate = || {
            Ok(AgentOutput::Envelope {
                messages: vec![Message::assistant("go on")],
                next_agent: Some("worker".into()),
                is_final: false,
            })
        };
        let supervisor = ScriptedAgent::new(
            "supervisor",
            AgentKind::Supervisor,
            vec![delegate(), delegate(), delegate()],
        );
        let worker = ScriptedAgent::new("worker", AgentKind::Executor, vec![bounce(), bounce(), bounce()]);
        let controller = WorkflowController::new(WorkflowConfig {
            max_iterations: 5,
            ..config()
        })
        .register(supervisor.clone())
        .register(worker.clone());

        let state = controller.execute("loop", None).await.unwrap();
        assert_eq!(state.current_agent, Target::End);
        assert_eq!(supervisor.calls() + worker.calls(), 5);
        // The sixth entry is answered by the ceiling, not by the worker.
        assert_eq!(state.iteration_count, 6);
        let last = state.last_message().unwrap();
        assert_eq!(last.error.as_deref(), Some(error_tags::MAX_ITERATIONS_REACHED));
        assert_eq!(last.is_final, Some(true));
        assert_eq!(last.from.as_deref(), Some("worker"));
    }

    #[tokio::test]
    async fn clarification_resumes_at_the_asking_agent() {
        let worker = ScriptedAgent::new(
            "worker",
            AgentKind::Executor,
            vec![
                Ok(AgentOutput::Single(
                    Message::assistant("which token?")
                        .with_metadata(metadata_keys::REQUIRES_CLARIFICATION, json!(true)),
                )),
                Ok(AgentOutput::Text("sent 5 ETH".into())),
            ],
        );
        let controller = WorkflowController::new(config()).register(worker.clone());

        let first = controller.execute("send 5 to bob", Some("t-1")).await.unwrap();
        assert!(first.metadata.waiting_for_input);
        let checkpoint = controller.checkpoints.get("t-1").await.unwrap().unwrap();
        assert!(checkpoint.is_suspended());

        let second = controller.execute("ETH", Some("t-1")).await.unwrap();
        assert_eq!(second.response(), Some("sent 5 ETH"));
        assert!(!second.metadata.waiting_for_input);
        assert_eq!(
            worker.seen_queries(),
            vec![
                Some("send 5 to bob".to_string()),
                Some("send 5 to bob".to_string())
            ]
        );
        assert_eq!(second.messages.len(), 4);
    }

    #[tokio::test]
    async fn reset_clears_stored_threads() {
        let worker = ScriptedAgent::new(
            "worker",
            AgentKind::Executor,
            vec![Ok(AgentOutput::Text("hi".into()))],
        );
        let controller = WorkflowController::new(config()).register(worker);
        controller.execute("hello", Some("t-2")).await.unwrap();
        assert!(controller.checkpoints.get("t-2").await.unwrap().is_some());

        controller.reset_checkpoints().await.unwrap();
        assert!(controller.checkpoints.get("t-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_controller_is_an_error() {
        let controller = WorkflowController::new(config());
        let err = controller.execute("hello", None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NoAgents));
    }
}
