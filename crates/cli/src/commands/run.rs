//! `snak run`: run the agent on one message, streaming its output.

use std::io::Write;

use snak_agent::AgentStreamEvent;
use snak_core::agent::{AgentMode, ExecutionMode};

use super::setup;

pub async fn run(message: &str, mode: Option<AgentMode>, planning: bool) -> anyhow::Result<()> {
    let mut config = setup::load_config()?;
    if let Some(mode) = mode {
        config.agent.mode = mode;
    }
    if planning {
        config.agent.execution_mode = ExecutionMode::Planning;
    }

    let agent = setup::agent(&config).await?;
    eprintln!(
        "  {} ({} / {})",
        config.agent.name, config.agent.mode, config.agent.execution_mode
    );

    let events = agent.execute_stream(message)?;
    print_stream(events).await
}

/// Print streamed text as it arrives and the closing summary.
pub async fn print_stream(
    mut events: tokio::sync::mpsc::Receiver<AgentStreamEvent>,
) -> anyhow::Result<()> {
    let mut streamed = false;
    while let Some(event) = events.recv().await {
        match event {
            AgentStreamEvent::NodeStart { node, graph_step } => {
                tracing::debug!(%node, graph_step, "Node started");
            }
            AgentStreamEvent::Chunk { content } => {
                print!("{content}");
                std::io::stdout().flush()?;
                streamed = true;
            }
            AgentStreamEvent::ModelEnd { .. } if streamed => {
                println!();
                streamed = false;
            }
            AgentStreamEvent::Interrupted { thread_id, prompt } => {
                println!();
                println!("  Waiting for your input: {prompt}");
                println!("  Resume with: snak resume --thread {thread_id} --input \"...\"");
            }
            AgentStreamEvent::Final {
                response,
                interrupted: false,
                graph_steps,
                usage,
                ..
            } => {
                println!();
                println!("{response}");
                eprintln!("  [{graph_steps} graph steps, {} tokens]", usage.total());
            }
            AgentStreamEvent::Error { message } => anyhow::bail!(message),
            _ => {}
        }
    }
    Ok(())
}
