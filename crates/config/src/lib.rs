//! Configuration loading, validation, and management for snak.
//!
//! Loads configuration from `~/.snak/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use snak_core::{AgentConfig, AgentMode, ExecutionMode};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.snak/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// The agent being run
    #[serde(default)]
    pub agent: AgentConfig,

    /// Model endpoints and tiers
    #[serde(default)]
    pub models: ModelsConfig,

    /// Executor graph budgets
    #[serde(default)]
    pub graph: GraphConfig,

    /// Workflow controller budgets
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Conversation memory
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Provider label, used for logging
    #[serde(default = "default_provider")]
    pub provider: String,

    /// OpenAI-compatible chat completions endpoint base
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model for tool-calling turns and validation
    #[serde(default = "default_fast_model")]
    pub fast: String,

    /// Model for planning and complex steps
    #[serde(default = "default_smart_model")]
    pub smart: String,

    /// Model for trivial turns (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cheap: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_fast_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_smart_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            api_key: None,
            fast: default_fast_model(),
            smart: default_smart_model(),
            cheap: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl std::fmt::Debug for ModelsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelsConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("fast", &self.fast)
            .field("smart", &self.smart)
            .field("cheap", &self.cheap)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Budget for one model invocation
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,

    /// Budget for one tool batch
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,

    /// Consecutive validator failures before a plan is abandoned
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Combined tool output budget
    #[serde(default = "default_tool_output_max_chars")]
    pub tool_output_max_chars: usize,

    /// Hard cap on node executions per run
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: u32,
}

fn default_model_timeout_ms() -> u64 {
    45_000
}
fn default_tool_timeout_ms() -> u64 {
    30_000
}
fn default_max_retry() -> u32 {
    3
}
fn default_tool_output_max_chars() -> usize {
    100_000
}
fn default_recursion_limit() -> u32 {
    500
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            model_timeout_ms: default_model_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            max_retry: default_max_retry(),
            tool_output_max_chars: default_tool_output_max_chars(),
            recursion_limit: default_recursion_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Node entries per workflow run
    #[serde(default = "default_workflow_max_iterations")]
    pub max_iterations: u32,

    /// Budget for one whole workflow run
    #[serde(default = "default_workflow_timeout_ms")]
    pub timeout_ms: u64,

    /// Consecutive calls to one agent before the run is terminated
    #[serde(default = "default_max_consecutive_agent_calls")]
    pub max_consecutive_agent_calls: u32,

    /// Persist workflow state per thread id
    #[serde(default = "default_true")]
    pub checkpointing: bool,
}

fn default_workflow_max_iterations() -> u32 {
    15
}
fn default_workflow_timeout_ms() -> u64 {
    120_000
}
fn default_max_consecutive_agent_calls() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_workflow_max_iterations(),
            timeout_ms: default_workflow_timeout_ms(),
            max_consecutive_agent_calls: default_max_consecutive_agent_calls(),
            checkpointing: true,
        }
    }
}

/// Which iteration store backs conversation memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackend {
    InMemory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: MemoryBackend,

    /// SQLite database file; defaults to `~/.snak/memory.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Iterations kept per agent
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Recent iterations included in every prompt
    #[serde(default = "default_short_term_size")]
    pub short_term_size: usize,

    /// Keyword matches recalled into every prompt
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
}

fn default_capacity() -> usize {
    20
}
fn default_short_term_size() -> usize {
    5
}
fn default_recall_limit() -> usize {
    3
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: MemoryBackend::default(),
            path: None,
            capacity: default_capacity(),
            short_term_size: default_short_term_size(),
            recall_limit: default_recall_limit(),
        }
    }
}

impl MemoryConfig {
    /// The SQLite file to open.
    pub fn database_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("memory.db"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.snak/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `SNAK_API_KEY` (highest priority)
    /// - `OPENAI_API_KEY`
    /// - `OPENROUTER_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if self.models.api_key.is_none() {
            self.models.api_key = lookup("SNAK_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .or_else(|| lookup("OPENROUTER_API_KEY"));
        }

        if let Some(mode) = lookup("SNAK_MODE") {
            self.agent.mode = mode
                .parse::<AgentMode>()
                .map_err(ConfigError::ValidationError)?;
        }

        if let Some(mode) = lookup("SNAK_EXECUTION_MODE") {
            self.agent.execution_mode = mode
                .parse::<ExecutionMode>()
                .map_err(ConfigError::ValidationError)?;
        }

        if let Some(model) = lookup("SNAK_MODEL") {
            self.models.smart = model;
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".snak")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.models.temperature < 0.0 || self.models.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "models.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_graph_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_graph_steps must be > 0".into(),
            ));
        }

        if self.graph.max_retry == 0 {
            return Err(ConfigError::ValidationError(
                "graph.max_retry must be > 0".into(),
            ));
        }

        if self.graph.model_timeout_ms == 0 || self.graph.tool_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "graph timeouts must be > 0".into(),
            ));
        }

        if self.workflow.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "workflow.timeout_ms must be > 0".into(),
            ));
        }

        if self.memory.short_term_size > self.memory.capacity {
            return Err(ConfigError::ValidationError(
                "memory.short_term_size cannot exceed memory.capacity".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.models.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
