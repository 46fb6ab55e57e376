//! Built-in workflow agents.

pub mod supervisor;
pub mod tools;

pub use supervisor::SupervisorAgent;
pub use tools::ToolsAgent;
