//! Conversation memory and checkpoint storage for snak.

pub mod conversation;
pub mod in_memory;
pub mod noop;

#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "sqlite")]
pub mod sqlite_checkpoint;

pub use conversation::{ConversationMemory, MemoryContext};
pub use in_memory::InMemoryIterationStore;
pub use noop::NoopIterationStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteIterationStore;
#[cfg(feature = "sqlite")]
pub use sqlite_checkpoint::SqliteCheckpointStore;
