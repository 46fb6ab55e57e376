//! Execution state and the plan/history progress model.
//!
//! The state is owned by the graph runtime for the length of one run.
//! Nodes never mutate it; they return a [`StateUpdate`] which the runtime
//! merges: messages concatenate, every other present field overwrites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snak_core::agent::ExecutionMode;
use snak_core::message::{Message, Role};

/// Graph node identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Planner,
    Reasoning,
    Tools,
    Validator,
    Human,
    EndGraph,
}

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Reasoning => "reasoning",
            Self::Tools => "tools",
            Self::Validator => "validator",
            Self::Human => "human",
            Self::EndGraph => "end_graph",
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where control goes after a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Node(NodeId),
    End,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
}

/// Content a model produced for a step, with its estimated size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMessage {
    pub content: String,
    pub tokens: usize,
}

/// One executed tool call, formatted for prompts and validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub tool_call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: String,
    pub tokens: usize,
}

impl ToolRecord {
    pub fn render(&self) -> String {
        format!("{}({}) -> {}", self.name, self.arguments, self.result)
    }
}

/// Planning-mode unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based
    pub step_number: usize,
    pub description: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<StepMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolRecord>>,
}

impl Step {
    pub fn new(step_number: usize, description: impl Into<String>) -> Self {
        Self {
            step_number,
            description: description.into(),
            status: StepStatus::Pending,
            message: None,
            tools: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn from_descriptions<I, S>(descriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: descriptions
                .into_iter()
                .enumerate()
                .map(|(i, d)| Step::new(i + 1, d))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Message,
    Tools,
}

/// Reactive-mode unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub kind: HistoryKind,
    pub content: String,
    pub tokens: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolRecord>>,
}

impl HistoryItem {
    pub fn message(content: impl Into<String>, tokens: usize) -> Self {
        Self {
            kind: HistoryKind::Message,
            content: content.into(),
            tokens,
            timestamp: Utc::now(),
            tools: None,
        }
    }

    pub fn tools(records: Vec<ToolRecord>) -> Self {
        let tokens = records.iter().map(|r| r.tokens).sum();
        Self {
            kind: HistoryKind::Tools,
            content: String::new(),
            tokens,
            timestamp: Utc::now(),
            tools: Some(records),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub items: Vec<HistoryItem>,
}

/// Exactly one active plan or history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanOrHistory {
    Plan(Plan),
    History(History),
}

impl PlanOrHistory {
    /// An empty container matching `mode`.
    pub fn empty_for(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Planning => Self::Plan(Plan::default()),
            ExecutionMode::Reactive => Self::History(History::default()),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Plan(_) => ExecutionMode::Planning,
            Self::History(_) => ExecutionMode::Reactive,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Plan(plan) => plan.steps.is_empty(),
            Self::History(history) => history.items.is_empty(),
        }
    }
}

/// State of one executor graph run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub messages: Vec<Message>,
    pub plans_or_histories: PlanOrHistory,
    pub current_step_index: usize,
    pub current_graph_step: u32,
    pub retry: u32,
    pub last_node: Option<NodeId>,
}

impl ExecutionState {
    pub fn new(mode: ExecutionMode, messages: Vec<Message>) -> Self {
        Self {
            messages,
            plans_or_histories: PlanOrHistory::empty_for(mode),
            current_step_index: 0,
            current_graph_step: 0,
            retry: 0,
            last_node: None,
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The request that started the run, ignoring answers typed at the
    /// human node.
    pub fn original_request(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User && m.from.as_deref() != Some(NodeId::Human.as_str()))
            .map(|m| m.content.as_str())
    }

    pub fn plan(&self) -> Option<&Plan> {
        match &self.plans_or_histories {
            PlanOrHistory::Plan(plan) => Some(plan),
            PlanOrHistory::History(_) => None,
        }
    }

    pub fn history(&self) -> Option<&History> {
        match &self.plans_or_histories {
            PlanOrHistory::History(history) => Some(history),
            PlanOrHistory::Plan(_) => None,
        }
    }

    /// The plan step the cursor points at, if any.
    pub fn current_step(&self) -> Option<&Step> {
        self.plan()
            .and_then(|plan| plan.steps.get(self.current_step_index))
    }

    /// Merge a node's update.
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        if let Some(poh) = update.plans_or_histories {
            self.plans_or_histories = poh;
        }
        if let Some(index) = update.current_step_index {
            self.current_step_index = index;
        }
        if let Some(retry) = update.retry {
            self.retry = retry;
        }
        if let Some(node) = update.last_node {
            self.last_node = Some(node);
        }
    }
}

/// A partial state returned by a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub plans_or_histories: Option<PlanOrHistory>,
    pub current_step_index: Option<usize>,
    pub retry: Option<u32>,
    pub last_node: Option<NodeId>,
}

impl StateUpdate {
    pub fn from_node(node: NodeId) -> Self {
        Self {
            last_node: Some(node),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_plans_or_histories(mut self, poh: PlanOrHistory) -> Self {
        self.plans_or_histories = Some(poh);
        self
    }

    pub fn with_step_index(mut self, index: usize) -> Self {
        self.current_step_index = Some(index);
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }
}
