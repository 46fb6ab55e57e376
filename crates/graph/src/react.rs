//! Free-text ReAct parsing.
//!
//! Models that do not emit structured tool calls can still follow the
//! `Thought: / Action: / Action Input: / Final Answer:` convention. This
//! parser recovers what it can and never fails: anything it does not
//! understand is simply "no action, no final answer".

use std::sync::LazyLock;

use regex_lite::Regex;

type Pattern = LazyLock<Option<Regex>>;

// Compiled once; a pattern that failed to compile matches nothing.
static THOUGHT: Pattern = LazyLock::new(|| {
    Regex::new(r"(?is)Thought:\s*(.*?)(?:\n\s*(?:Action|Final Answer)\s*:|\z)").ok()
});
static ACTION: Pattern =
    LazyLock::new(|| Regex::new(r"(?im)^\s*Action:\s*([A-Za-z0-9_\-.]+)\s*$").ok());
static ACTION_INPUT: Pattern = LazyLock::new(|| {
    Regex::new(r"(?is)Action Input:\s*(.*?)(?:\n\s*(?:Observation|Thought)\s*:|\z)").ok()
});
static FINAL_ANSWER: Pattern = LazyLock::new(|| Regex::new(r"(?is)Final Answer:\s*(.*)\z").ok());

#[derive(Debug, Clone, PartialEq)]
pub struct ReactAction {
    pub tool: String,
    /// JSON when the input parses as JSON, otherwise the raw string
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReactStep {
    pub thought: Option<String>,
    pub action: Option<ReactAction>,
    pub final_answer: Option<String>,
}

impl ReactStep {
    pub fn is_final(&self) -> bool {
        self.final_answer.is_some()
    }
}

fn capture(pattern: &Pattern, text: &str) -> Option<String> {
    (**pattern)
        .as_ref()?
        .captures(text)?
        .get(1)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a model reply written in the ReAct convention.
pub fn parse_react(content: &str) -> ReactStep {
    let thought = capture(&THOUGHT, content);
    let final_answer = capture(&FINAL_ANSWER, content);

    let action = capture(&ACTION, content).map(|tool| {
        let raw = capture(&ACTION_INPUT, content).unwrap_or_default();
        let input = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
        ReactAction { tool, input }
    });

    ReactStep {
        thought,
        action,
        final_answer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pattern_compiles() {
        for pattern in [&THOUGHT, &ACTION, &ACTION_INPUT, &FINAL_ANSWER] {
            assert!(pattern.is_some());
        }
    }

    #[test]
    fn parses_action_with_json_input() {
        let step = parse_react(
            "Thought: I need the balance\nAction: get_balance\nAction Input: {\"account\": \"0x1\"}",
        );
        assert_eq!(step.thought.as_deref(), Some("I need the balance"));
        let action = step.action.unwrap();
        assert_eq!(action.tool, "get_balance");
        assert_eq!(action.input["account"], "0x1");
        assert!(step.final_answer.is_none());
    }

    #[test]
    fn non_json_input_is_kept_as_string() {
        let step = parse_react("Thought: search\nAction: search\nAction Input: starknet fees");
        assert_eq!(
            step.action.unwrap().input,
            serde_json::Value::String("starknet fees".into())
        );
    }

    #[test]
    fn parses_final_answer() {
        let step = parse_react("Thought: I know it now\nFinal Answer: done");
        assert!(step.is_final());
        assert_eq!(step.final_answer.as_deref(), Some("done"));
        assert!(step.action.is_none());
    }

    #[test]
    fn thought_without_action() {
        let step = parse_react("Thought: let me think about this some more");
        assert!(step.action.is_none());
        assert!(!step.is_final());
        assert!(step.thought.is_some());
    }

    #[test]
    fn unstructured_text_yields_nothing() {
        assert_eq!(parse_react("just some prose"), ReactStep::default());
        assert_eq!(parse_react(""), ReactStep::default());
    }

    #[test]
    fn observation_ends_action_input() {
        let step = parse_react("Action: lookup\nAction Input: abc\nObservation: found");
        assert_eq!(
            step.action.unwrap().input,
            serde_json::Value::String("abc".into())
        );
    }
}
