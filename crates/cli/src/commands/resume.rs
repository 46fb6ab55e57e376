//! `snak resume`: answer a hybrid run waiting for human input.

use snak_core::agent::AgentMode;

use super::{run, setup};

pub async fn run(thread_id: &str, input: &str) -> anyhow::Result<()> {
    let mut config = setup::load_config()?;
    // Only hybrid runs suspend, so only a hybrid agent can resume one.
    config.agent.mode = AgentMode::Hybrid;

    let agent = setup::agent(&config).await?;
    let events = agent.resume_hybrid_stream(thread_id, input)?;
    run::print_stream(events).await
}
