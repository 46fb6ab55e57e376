//! Capacity-bounded conversation memory.
//!
//! Wraps any [`IterationStore`] with ring-buffer semantics per agent and
//! assembles the short-term (most recent) and long-term (keyword recall)
//! context that reasoning prompts include.

use std::sync::Arc;

use snak_core::error::MemoryError;
use snak_core::memory::{Iteration, IterationStore};
use tracing::debug;

use crate::noop::NoopIterationStore;

/// Memory context for one prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryContext {
    /// Most recent iterations, oldest first
    pub short_term: Vec<Iteration>,
    /// Keyword matches not already in `short_term`
    pub long_term: Vec<Iteration>,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.short_term.is_empty() && self.long_term.is_empty()
    }

    pub fn render_short_term(&self) -> String {
        render(&self.short_term)
    }

    pub fn render_long_term(&self) -> String {
        render(&self.long_term)
    }
}

fn render(items: &[Iteration]) -> String {
    items
        .iter()
        .map(Iteration::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Per-agent conversation memory with a fixed capacity.
#[derive(Clone)]
pub struct ConversationMemory {
    store: Arc<dyn IterationStore>,
    capacity: usize,
    short_term_size: usize,
    recall_limit: usize,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn IterationStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity,
            short_term_size: 5,
            recall_limit: 3,
        }
    }

    /// Memory that records and recalls nothing.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopIterationStore), 0)
    }

    pub fn with_short_term_size(mut self, size: usize) -> Self {
        self.short_term_size = size;
        self
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.store.name()
    }

    /// Record a completed exchange, evicting the oldest entries past capacity.
    pub async fn record(
        &self,
        agent_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<(), MemoryError> {
        self.store
            .insert_iteration(Iteration::new(agent_id, question, answer))
            .await?;

        let mut count = self.store.count_iterations(agent_id).await?;
        while count > self.capacity {
            if !self.store.delete_oldest_iteration(agent_id).await? {
                break;
            }
            count -= 1;
        }
        debug!(agent_id, count, capacity = self.capacity, "Recorded iteration");
        Ok(())
    }

    /// Build the memory context for a prompt about `query`.
    pub async fn context(&self, agent_id: &str, query: &str) -> Result<MemoryContext, MemoryError> {
        let short_term = if self.short_term_size == 0 {
            Vec::new()
        } else {
            self.store
                .recent_iterations(agent_id, self.short_term_size)
                .await?
        };

        let long_term = if self.recall_limit == 0 || query.trim().is_empty() {
            Vec::new()
        } else {
            self.store
                .search_iterations(agent_id, query, self.recall_limit + short_term.len())
                .await?
                .into_iter()
                .filter(|it| !short_term.contains(it))
                .take(self.recall_limit)
                .collect()
        };

        Ok(MemoryContext {
            short_term,
            long_term,
        })
    }
}
