//! Checkpoint storage: persisted run state keyed by thread id.
//!
//! Both schedulers save their state here after every transition when
//! checkpointing is enabled. A suspended human-in-the-loop run is simply a
//! checkpoint whose status is [`RunStatus::AwaitingInput`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CheckpointError;

/// Lifecycle state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Suspended at a human node until resumed with input
    AwaitingInput { prompt: String },
    Completed,
}

/// A persisted snapshot of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub status: RunStatus,
    /// Serialized scheduler state
    pub state: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: impl Into<String>, status: RunStatus, state: serde_json::Value) -> Self {
        Self {
            thread_id: thread_id.into(),
            status,
            state,
            updated_at: Utc::now(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.status, RunStatus::AwaitingInput { .. })
    }

    /// Deserialize the stored state.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, CheckpointError> {
        serde_json::from_value(self.state.clone()).map_err(|e| CheckpointError::Corrupt {
            thread_id: self.thread_id.clone(),
            reason: e.to_string(),
        })
    }
}

/// Keyed storage for checkpoints.
///
/// Access is never concurrent per key; callers serialize runs that share a
/// thread id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Create or overwrite.
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError>;

    async fn delete(&self, thread_id: &str) -> Result<bool, CheckpointError>;

    /// Drop every checkpoint.
    async fn clear(&self) -> Result<(), CheckpointError>;
}

/// In-process checkpoint store.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.checkpoints.read().await.get(thread_id).cloned())
    }

    async fn put(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.thread_id.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, CheckpointError> {
        Ok(self.checkpoints.write().await.remove(thread_id).is_some())
    }

    async fn clear(&self) -> Result<(), CheckpointError> {
        self.checkpoints.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_overwrite() {
        let store = InMemoryCheckpointStore::new();
        store
            .put(Checkpoint::new("t1", RunStatus::Running, serde_json::json!({"n": 1})))
            .await
            .unwrap();
        store
            .put(Checkpoint::new("t1", RunStatus::Completed, serde_json::json!({"n": 2})))
            .await
            .unwrap();

        let cp = store.get("t1").await.unwrap().unwrap();
        assert_eq!(cp.status, RunStatus::Completed);
        assert_eq!(cp.state["n"], 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = InMemoryCheckpointStore::new();
        for id in ["a", "b", "c"] {
            store
                .put(Checkpoint::new(id, RunStatus::Running, serde_json::Value::Null))
                .await
                .unwrap();
        }
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        store.clear().await.unwrap();
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[test]
    fn awaiting_input_is_suspended() {
        let cp = Checkpoint::new(
            "t",
            RunStatus::AwaitingInput {
                prompt: "Which account?".into(),
            },
            serde_json::Value::Null,
        );
        assert!(cp.is_suspended());
        let json = serde_json::to_value(&cp.status).unwrap();
        assert_eq!(json["status"], "awaiting_input");
    }

    #[test]
    fn decode_reports_corruption() {
        let cp = Checkpoint::new("t", RunStatus::Running, serde_json::json!("not a map"));
        let err = cp.decode::<HashMap<String, u32>>().unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }
}
