//! Agent configuration and mode types.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the agent engages with its caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// One request in, one answer out (default)
    #[default]
    Interactive,
    /// Goal-driven; runs until the goal is met or the iteration budget is spent
    Autonomous,
    /// Autonomous with human-in-the-loop suspension points
    Hybrid,
}

impl FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" => Ok(Self::Interactive),
            "autonomous" => Ok(Self::Autonomous),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown agent mode: {other}")),
        }
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interactive => write!(f, "interactive"),
            Self::Autonomous => write!(f, "autonomous"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// How the executor graph organises work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Linear turn history, validator skipped in interactive mode
    #[default]
    Reactive,
    /// Multi-step plan with per-step validation
    Planning,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reactive" => Ok(Self::Reactive),
            "planning" => Ok(Self::Planning),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reactive => write!(f, "reactive"),
            Self::Planning => write!(f, "planning"),
        }
    }
}

/// Configuration for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Stable identifier, also the key for conversation memory
    #[serde(default = "default_id")]
    pub id: String,

    /// Human-readable name
    #[serde(default = "default_name")]
    pub name: String,

    /// What the agent is for (given to the supervisor when routing)
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub mode: AgentMode,

    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Iteration budget for autonomous runs
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Global node-transition ceiling for one graph run
    #[serde(default = "default_max_graph_steps")]
    pub max_graph_steps: u32,

    /// System instructions prepended to every reasoning prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_id() -> String {
    "snak".into()
}
fn default_name() -> String {
    "Snak".into()
}
fn default_max_iterations() -> u32 {
    15
}
fn default_max_graph_steps() -> u32 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            name: default_name(),
            description: String::new(),
            mode: AgentMode::default(),
            execution_mode: ExecutionMode::default(),
            max_iterations: default_max_iterations(),
            max_graph_steps: default_max_graph_steps(),
            system_prompt: None,
        }
    }
}
