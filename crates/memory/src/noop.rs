//! No-op iteration store: disables conversation memory entirely.

use async_trait::async_trait;
use snak_core::error::MemoryError;
use snak_core::memory::{Iteration, IterationStore};

/// An iteration store that stores nothing.
pub struct NoopIterationStore;

#[async_trait]
impl IterationStore for NoopIterationStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn insert_iteration(&self, _iteration: Iteration) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn count_iterations(&self, _agent_id: &str) -> Result<usize, MemoryError> {
        Ok(0)
    }

    async fn delete_oldest_iteration(&self, _agent_id: &str) -> Result<bool, MemoryError> {
        Ok(false)
    }

    async fn recent_iterations(
        &self,
        _agent_id: &str,
        _limit: usize,
    ) -> Result<Vec<Iteration>, MemoryError> {
        Ok(Vec::new())
    }

    async fn search_iterations(
        &self,
        _agent_id: &str,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<Iteration>, MemoryError> {
        Ok(Vec::new())
    }
}
