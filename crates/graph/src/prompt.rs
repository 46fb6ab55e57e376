//! Prompt assembly for the model-calling nodes.

use snak_core::message::{HUMAN_INPUT_MARKER, Message, Role};
use snak_core::token::TokenEstimator;
use snak_memory::MemoryContext;

use crate::config::RunConfig;
use crate::error::GraphError;
use crate::state::{ExecutionState, PlanOrHistory, Step};

/// Per-message character cap used when a prompt overflowed the context window.
pub const DEGRADED_MESSAGE_CHARS: usize = 2_000;

const REACT_INSTRUCTIONS: &str = "Answer using this format:\n\
Thought: your reasoning\n\
Action: the tool to call\n\
Action Input: the tool arguments as JSON\n\
When you are done, reply with:\n\
Final Answer: your answer";

/// What the reasoning node is asked to do on this turn.
pub fn step_instruction(state: &ExecutionState, config: &RunConfig) -> Result<String, GraphError> {
    match &state.plans_or_histories {
        PlanOrHistory::Plan(plan) => {
            let step = plan.steps.get(state.current_step_index).ok_or_else(|| {
                GraphError::structural(format!(
                    "no plan step at index {} (plan has {} steps)",
                    state.current_step_index,
                    plan.steps.len()
                ))
            })?;
            Ok(format!(
                "Execute step {} of {}: {}",
                step.step_number,
                plan.steps.len(),
                step.description
            ))
        }
        PlanOrHistory::History(_) => Ok(config.user_request.clone()),
    }
}

fn system_prompt(config: &RunConfig) -> String {
    let agent = &config.agent_config;
    let mut prompt = agent.system_prompt.clone().unwrap_or_else(|| {
        format!("You are {}, {}", agent.name, agent.description)
    });
    if config.is_react() {
        prompt.push_str("\n\n");
        prompt.push_str(REACT_INSTRUCTIONS);
    }
    if config.is_hybrid() {
        prompt.push_str(&format!(
            "\n\nIf you need information only the user can give, say so and include {HUMAN_INPUT_MARKER}."
        ));
    }
    prompt
}

fn memory_section(memory: &MemoryContext) -> Option<String> {
    if memory.is_empty() {
        return None;
    }
    let mut section = String::new();
    if !memory.short_term.is_empty() {
        section.push_str("## Recent exchanges\n");
        section.push_str(&memory.render_short_term());
    }
    if !memory.long_term.is_empty() {
        if !section.is_empty() {
            section.push_str("\n\n");
        }
        section.push_str("## Related past exchanges\n");
        section.push_str(&memory.render_long_term());
    }
    Some(section)
}

fn step_context(step: &Step) -> Option<String> {
    let tools = step.tools.as_ref()?;
    let rendered: Vec<String> = tools.iter().map(|t| t.render()).collect();
    Some(format!("Tool results so far:\n{}", rendered.join("\n")))
}

/// The full reasoning prompt.
///
/// With `clip` set, every carried message is cut to that many characters.
pub fn reasoning_prompt(
    state: &ExecutionState,
    config: &RunConfig,
    memory: Option<&MemoryContext>,
    instruction: &str,
    clip: Option<(&dyn TokenEstimator, usize)>,
) -> Vec<Message> {
    let mut messages = vec![Message::system(system_prompt(config))];
    if let Some(section) = memory.and_then(memory_section) {
        messages.push(Message::system(section));
    }

    for message in state.messages.iter().filter(|m| m.role != Role::System) {
        let mut carried = message.clone();
        if let Some((tokenizer, max_chars)) = clip {
            if let Ok(short) = tokenizer.truncate(&carried.content, max_chars) {
                carried.content = short;
            }
        }
        messages.push(carried);
    }

    if let Some(context) = state.current_step().and_then(step_context) {
        messages.push(Message::system(context));
    }
    messages.push(Message::user(instruction));
    messages
}

/// Last-resort prompt when even a clipped prompt does not fit.
pub fn minimal_prompt(config: &RunConfig, instruction: &str) -> Vec<Message> {
    vec![
        Message::system(system_prompt(config)),
        Message::user(format!(
            "Take one simple action towards this goal and keep the reply short: {instruction}"
        )),
    ]
}

pub fn planner_prompt(config: &RunConfig) -> Vec<Message> {
    vec![
        Message::system(
            "Break the user's request into a short ordered list of concrete steps. \
             Each step must be achievable with a single reasoning turn and, if needed, tool calls.",
        ),
        Message::user(config.user_request.clone()),
    ]
}

pub fn validator_prompt(context: &str) -> Vec<Message> {
    vec![
        Message::system(
            "You validate whether a step of an agent's work achieved its goal. \
             Reply with success true or false and list your reasons in results.",
        ),
        Message::user(context.to_string()),
    ]
}
