//! Token estimation and per-run token accounting.
//!
//! Estimation is a heuristic (about four characters per token); it is used
//! to bound context growth, not to bill.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Estimates and truncates text by token budget.
pub trait TokenEstimator: Send + Sync {
    fn estimate_tokens(&self, text: &str) -> usize;

    /// Cut `text` down to at most `max_chars` characters.
    fn truncate(&self, text: &str, max_chars: usize) -> Result<String, ToolError>;
}

/// Character-count heuristic: roughly 4 characters per token.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

const CHARS_PER_TOKEN: usize = 4;
const TRUNCATION_NOTICE: &str = "\n... [output truncated]";

impl TokenEstimator for HeuristicTokenizer {
    fn estimate_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }

    fn truncate(&self, text: &str, max_chars: usize) -> Result<String, ToolError> {
        if text.chars().count() <= max_chars {
            return Ok(text.to_string());
        }
        let keep = max_chars.checked_sub(TRUNCATION_NOTICE.len()).ok_or_else(|| {
            ToolError::TruncationFailed(format!(
                "budget of {max_chars} chars cannot hold the truncation notice"
            ))
        })?;
        let mut out: String = text.chars().take(keep).collect();
        out.push_str(TRUNCATION_NOTICE);
        Ok(out)
    }
}

/// Snapshot of a tracker's totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub tool_tokens: u64,
}

impl TokenTotals {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens + self.tool_tokens
    }
}

/// Accumulates token usage for one agent.
///
/// Injected into the reasoning and tool nodes; one tracker per agent, not
/// per process.
#[derive(Debug)]
pub struct TokenTracker {
    totals: Mutex<TokenTotals>,
    threshold: u64,
}

impl Default for TokenTracker {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl TokenTracker {
    pub fn new(threshold: u64) -> Self {
        Self {
            totals: Mutex::new(TokenTotals::default()),
            threshold,
        }
    }

    pub fn record_model(&self, prompt_tokens: u64, completion_tokens: u64) {
        let mut totals = self.lock();
        totals.prompt_tokens += prompt_tokens;
        totals.completion_tokens += completion_tokens;
    }

    pub fn record_tool(&self, tokens: u64) {
        self.lock().tool_tokens += tokens;
    }

    pub fn totals(&self) -> TokenTotals {
        *self.lock()
    }

    /// Whether accumulated usage has crossed the configured threshold.
    pub fn over_threshold(&self) -> bool {
        self.lock().total() >= self.threshold
    }

    pub fn reset(&self) {
        *self.lock() = TokenTotals::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TokenTotals> {
        // A poisoned counter is still a valid counter.
        self.totals.lock().unwrap_or_else(|e| e.into_inner())
    }
}
