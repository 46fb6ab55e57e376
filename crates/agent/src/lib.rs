//! The snak agent wrapper.
//!
//! A [`SnakAgent`] owns one executor graph and drives it in the mode the
//! agent is configured for:
//!
//! 1. **Interactive**: one request in, one answer out, on a fresh thread
//! 2. **Autonomous**: a dedicated thread and a recursion cap derived from
//!    the iteration budget
//! 3. **Hybrid**: like autonomous, but the graph may suspend at the human
//!    node; [`SnakAgent::resume_hybrid`] continues it by thread id
//!
//! Runs are either blocking ([`SnakAgent::execute`]) or streamed
//! ([`SnakAgent::execute_stream`]). A `SnakAgent` is also a
//! [`snak_workflow::WorkflowAgent`], so it can be registered as an executor
//! with the workflow controller.

pub mod error;
pub mod snak_agent;
pub mod stream_event;
pub mod workflow_agent;

pub use error::AgentError;
pub use snak_agent::{AgentResponse, SnakAgent, autonomous_recursion_limit};
pub use stream_event::AgentStreamEvent;
