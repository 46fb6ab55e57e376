//! In-memory iteration store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use snak_core::error::MemoryError;
use snak_core::memory::{Iteration, IterationStore};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Stores iterations per agent in insertion order.
pub struct InMemoryIterationStore {
    entries: Arc<RwLock<HashMap<String, VecDeque<Iteration>>>>,
}

impl InMemoryIterationStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryIterationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Query words worth matching on.
pub(crate) fn keywords(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(|w| w.to_lowercase())
        .collect()
}

#[async_trait]
impl IterationStore for InMemoryIterationStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert_iteration(&self, iteration: Iteration) -> Result<(), MemoryError> {
        self.entries
            .write()
            .await
            .entry(iteration.agent_id.clone())
            .or_default()
            .push_back(iteration);
        Ok(())
    }

    async fn count_iterations(&self, agent_id: &str) -> Result<usize, MemoryError> {
        Ok(self
            .entries
            .read()
            .await
            .get(agent_id)
            .map_or(0, VecDeque::len))
    }

    async fn delete_oldest_iteration(&self, agent_id: &str) -> Result<bool, MemoryError> {
        Ok(self
            .entries
            .write()
            .await
            .get_mut(agent_id)
            .and_then(VecDeque::pop_front)
            .is_some())
    }

    async fn recent_iterations(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<Iteration>, MemoryError> {
        let entries = self.entries.read().await;
        let Some(list) = entries.get(agent_id) else {
            return Ok(Vec::new());
        };
        let skip = list.len().saturating_sub(limit);
        Ok(list.iter().skip(skip).cloned().collect())
    }

    async fn search_iterations(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Iteration>, MemoryError> {
        let words = keywords(query);
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let Some(list) = entries.get(agent_id) else {
            return Ok(Vec::new());
        };

        // (score, insertion index) so ties go to the newer iteration
        let mut scored: Vec<(usize, usize, &Iteration)> = list
            .iter()
            .enumerate()
            .filter_map(|(i, it)| {
                let haystack = format!("{} {}", it.question, it.answer).to_lowercase();
                let score = words.iter().filter(|w| haystack.contains(w.as_str())).count();
                (score > 0).then_some((score, i, it))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, _, it)| it.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_count_and_delete_oldest() {
        let store = InMemoryIterationStore::new();
        store
            .insert_iteration(Iteration::new("a", "first", "1"))
            .await
            .unwrap();
        store
            .insert_iteration(Iteration::new("a", "second", "2"))
            .await
            .unwrap();
        store
            .insert_iteration(Iteration::new("b", "other agent", "x"))
            .await
            .unwrap();

        assert_eq!(store.count_iterations("a").await.unwrap(), 2);
        assert!(store.delete_oldest_iteration("a").await.unwrap());

        let recent = store.recent_iterations("a", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].question, "second");
        assert_eq!(store.count_iterations("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_oldest_on_empty_agent() {
        let store = InMemoryIterationStore::new();
        assert!(!store.delete_oldest_iteration("ghost").await.unwrap());
        assert_eq!(store.count_iterations("ghost").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recent_returns_newest_last() {
        let store = InMemoryIterationStore::new();
        for i in 0..5 {
            store
                .insert_iteration(Iteration::new("a", format!("q{i}"), "a"))
                .await
                .unwrap();
        }
        let recent = store.recent_iterations("a", 2).await.unwrap();
        let questions: Vec<_> = recent.iter().map(|i| i.question.as_str()).collect();
        assert_eq!(questions, vec!["q3", "q4"]);
    }

    #[tokio::test]
    async fn search_ranks_by_keyword_hits() {
        let store = InMemoryIterationStore::new();
        store
            .insert_iteration(Iteration::new("a", "What is my STRK balance?", "12 STRK"))
            .await
            .unwrap();
        store
            .insert_iteration(Iteration::new("a", "Transfer ETH to Bob", "Sent 1 ETH"))
            .await
            .unwrap();
        store
            .insert_iteration(Iteration::new("a", "Weather today", "Sunny"))
            .await
            .unwrap();

        let hits = store
            .search_iterations("a", "strk balance please", 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].question.contains("STRK"));

        let none = store.search_iterations("a", "?? !!", 5).await.unwrap();
        assert!(none.is_empty());
    }
}
