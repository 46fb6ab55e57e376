//! Wiring shared by the commands: config, models, memory and checkpoints.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use snak_agent::SnakAgent;
use snak_config::{AppConfig, MemoryBackend, MemoryConfig};
use snak_core::checkpoint::CheckpointStore;
use snak_core::memory::IterationStore;
use snak_core::tool::ToolRegistry;
use snak_memory::{
    ConversationMemory, InMemoryIterationStore, SqliteCheckpointStore, SqliteIterationStore,
};
use snak_providers::StaticModelSelector;
use tracing::debug;

/// Load the config and make sure a model can be reached.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let config = AppConfig::load().context("Failed to load config")?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    export OPENROUTER_API_KEY='sk-or-v1-...'   (recommended)");
        eprintln!("    export OPENAI_API_KEY='sk-...'             (for OpenAI direct)");
        eprintln!("    export SNAK_API_KEY='sk-...'               (generic)");
        eprintln!();
        eprintln!("  Or add it to the [models] section of your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        anyhow::bail!("No API key found. See above for setup instructions.");
    }
    Ok(config)
}

pub fn selector(config: &AppConfig) -> anyhow::Result<Arc<StaticModelSelector>> {
    let selector = snak_providers::build_from_config(&config.models)
        .context("Failed to build model selector")?;
    Ok(Arc::new(selector))
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

pub async fn memory(config: &MemoryConfig) -> anyhow::Result<ConversationMemory> {
    if !config.enabled {
        return Ok(ConversationMemory::disabled());
    }
    let store: Arc<dyn IterationStore> = match config.backend {
        MemoryBackend::InMemory => Arc::new(InMemoryIterationStore::new()),
        MemoryBackend::Sqlite => {
            let path = config.database_path();
            ensure_parent(&path)?;
            Arc::new(
                SqliteIterationStore::new(&path.to_string_lossy())
                    .await
                    .context("Failed to open memory database")?,
            )
        }
    };
    debug!(backend = store.name(), "Conversation memory ready");
    Ok(ConversationMemory::new(store, config.capacity)
        .with_short_term_size(config.short_term_size)
        .with_recall_limit(config.recall_limit))
}

/// Checkpoints live on disk so a later `snak` invocation can pick up a run
/// started by another process.
pub async fn checkpoints(file: &str) -> anyhow::Result<Arc<dyn CheckpointStore>> {
    let path = AppConfig::config_dir().join(file);
    ensure_parent(&path)?;
    let store = SqliteCheckpointStore::new(&path.to_string_lossy())
        .await
        .context("Failed to open checkpoint database")?;
    Ok(Arc::new(store))
}

/// Build and initialize the configured agent.
pub async fn agent(config: &AppConfig) -> anyhow::Result<SnakAgent> {
    let selector = selector(config)?;
    let memory = memory(&config.memory).await?;
    let checkpoints = checkpoints("checkpoints.db").await?;

    let mut agent = SnakAgent::from_app_config(
        config,
        selector,
        Arc::new(ToolRegistry::new()),
        memory,
    )
    .with_checkpoints(checkpoints);
    agent.init()?;
    Ok(agent)
}
