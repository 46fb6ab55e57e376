//! Shared test helpers for workflow tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use snak_core::error::ModelError;
use snak_core::message::Message;
use snak_core::model::{ChatModel, ModelRequest, ModelResponse};

use crate::agent::{AgentContext, AgentKind, AgentOutput, WorkflowAgent};
use crate::error::WorkflowError;
use crate::state::WorkflowState;

/// An agent that returns a sequence of scripted results.
///
/// Panics if called more often than results were provided.
pub struct ScriptedAgent {
    id: String,
    kind: AgentKind,
    replies: Mutex<VecDeque<Result<AgentOutput, WorkflowError>>>,
    calls: AtomicUsize,
    seen_queries: Mutex<Vec<Option<String>>>,
}

impl ScriptedAgent {
    pub fn new(
        id: &str,
        kind: AgentKind,
        replies: Vec<Result<AgentOutput, WorkflowError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            seen_queries: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The original user query as seen on each call.
    pub fn seen_queries(&self) -> Vec<Option<String>> {
        self.seen_queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowAgent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        _ctx: &AgentContext<'_>,
    ) -> Result<AgentOutput, WorkflowError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_queries
            .lock()
            .unwrap()
            .push(state.metadata.original_user_query.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedAgent {}: no more replies (call #{call})", self.id))
    }
}

/// An agent whose execution never finishes.
pub struct PendingAgent;

#[async_trait]
impl WorkflowAgent for PendingAgent {
    fn id(&self) -> &str {
        "stuck"
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Executor
    }

    async fn execute(
        &self,
        _state: &WorkflowState,
        _ctx: &AgentContext<'_>,
    ) -> Result<AgentOutput, WorkflowError> {
        std::future::pending().await
    }
}

/// A chat model that answers with scripted text.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedModel: no more replies");
        Ok(ModelResponse {
            message: Message::assistant(reply),
            usage: None,
            model: "scripted".into(),
        })
    }
}
