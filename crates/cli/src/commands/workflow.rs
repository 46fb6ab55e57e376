//! `snak workflow`: route a message through the supervisor, the tools agent
//! and the configured agent.

use std::sync::Arc;

use anyhow::Context;
use snak_core::model::{ModelSelector, ModelTier};
use snak_core::tool::ToolRegistry;
use snak_workflow::{SupervisorAgent, ToolsAgent, WorkflowController};
use uuid::Uuid;

use super::setup;

pub async fn run(message: &str, thread_id: Option<&str>) -> anyhow::Result<()> {
    let config = setup::load_config()?;
    let selector = setup::selector(&config)?;
    let supervisor_model = selector
        .model(ModelTier::Smart)
        .context("No smart model configured for the supervisor")?;

    let agent = setup::agent(&config).await?;
    let controller = WorkflowController::new(config.workflow.clone())
        .with_checkpoints(setup::checkpoints("workflow.db").await?)
        .register(Arc::new(
            SupervisorAgent::new(supervisor_model).with_timeout_ms(config.graph.model_timeout_ms),
        ))
        .register(Arc::new(
            ToolsAgent::new(Arc::new(ToolRegistry::new())).with_limits(config.graph.clone()),
        ))
        .register(Arc::new(agent));

    let thread_id = thread_id
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let state = controller.execute(message, Some(&thread_id)).await?;

    println!("{}", state.response().unwrap_or("(no response)"));
    eprintln!(
        "  [thread {thread_id}, agents: {}]",
        state.metadata.agent_history.join(" -> ")
    );
    if state.metadata.waiting_for_input {
        eprintln!("  Reply with: snak workflow --thread {thread_id} -m \"...\"");
    }
    Ok(())
}
