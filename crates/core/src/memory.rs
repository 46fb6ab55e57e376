//! Conversation memory: bounded per-agent storage of past iterations.
//!
//! An iteration is one completed question/answer exchange. Stores are
//! keyed by agent id; capacity is enforced by the caller through
//! `count_iterations` + `delete_oldest_iteration`, giving ring-buffer
//! behaviour on any backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// A single completed exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    /// Which agent produced the answer
    pub agent_id: String,

    /// What was asked
    pub question: String,

    /// What the agent answered
    pub answer: String,

    /// When it was recorded
    pub created_at: DateTime<Utc>,
}

impl Iteration {
    pub fn new(
        agent_id: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            question: question.into(),
            answer: answer.into(),
            created_at: Utc::now(),
        }
    }

    /// Render as a prompt line.
    pub fn render(&self) -> String {
        format!("Q: {}\nA: {}", self.question, self.answer)
    }
}

/// Storage for iterations.
///
/// Implementations: in-memory, SQLite, no-op.
#[async_trait]
pub trait IterationStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory", "none").
    fn name(&self) -> &str;

    async fn insert_iteration(&self, iteration: Iteration) -> Result<(), MemoryError>;

    async fn count_iterations(&self, agent_id: &str) -> Result<usize, MemoryError>;

    /// Delete the oldest iteration for the agent. Returns whether one existed.
    async fn delete_oldest_iteration(&self, agent_id: &str) -> Result<bool, MemoryError>;

    /// Most recent iterations, newest last.
    async fn recent_iterations(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<Iteration>, MemoryError>;

    /// Keyword search over questions and answers, best matches first.
    async fn search_iterations(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Iteration>, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_renders_question_and_answer() {
        let it = Iteration::new("agent", "What is my balance?", "12 STRK");
        assert_eq!(it.render(), "Q: What is my balance?\nA: 12 STRK");
    }

    #[test]
    fn iteration_serialization() {
        let it = Iteration::new("agent", "q", "a");
        let json = serde_json::to_string(&it).unwrap();
        assert!(json.contains("agent_id"));
        let back: Iteration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, it);
    }
}
