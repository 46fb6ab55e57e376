//! # snak core
//!
//! Domain types, traits, and error definitions for the snak agent
//! orchestration runtime. This crate has no framework dependencies: it
//! defines the vocabulary that the executor graph, the workflow controller
//! and the agent wrapper all speak.
//!
//! ## Design Philosophy
//!
//! Every collaborator the schedulers talk to (language models, tools,
//! conversation memory, checkpoint storage, token estimation) is a trait
//! here. Implementations live in their respective crates, and tests swap
//! in scripted mocks.

pub mod agent;
pub mod checkpoint;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod model;
pub mod token;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentConfig, AgentMode, ExecutionMode};
pub use checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore, RunStatus};
pub use error::{Error, Result};
pub use event::{EventKind, GraphEvent};
pub use memory::{Iteration, IterationStore};
pub use message::{Message, MessageToolCall, Role, is_final_message};
pub use model::{ChatModel, ModelRequest, ModelResponse, ModelSelector, ModelTier, SelectedModel};
pub use token::{HeuristicTokenizer, TokenEstimator, TokenTracker};
pub use tool::{Tool, ToolCall, ToolOutput, ToolRegistry};
