//! Agent context: everything one agent sees when it acts

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::Result;
use crate::llm::estimate_tokens;
use crate::prompt::{PromptRenderer, templates};

/// Inputs for one agent turn, rendered through the agent templates
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentContext {
    pub agent_id: String,
    pub role: String,
    pub profile: String,
    /// Task instructions; never truncated
    pub task: String,
    pub initial_progress: Option<String>,
    /// Environment action instructions; never truncated
    pub instructions: String,
    pub turn: u32,
    pub max_iterations: u32,
    pub recipients: String,
    /// Environment snapshot, rendered as pretty JSON
    #[serde(serialize_with = "pretty_state")]
    pub state: Value,
    /// Recalled memory, oldest first
    pub memory: Vec<String>,
    /// Visible transcript lines, oldest first
    pub history: Vec<String>,
    pub feedback: Option<String>,
    /// Why the previous reply in this turn was rejected
    pub hint: Option<String>,
}

/// Rendered system prompt and user message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl RenderedPrompt {
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.system) + estimate_tokens(&self.user)
    }
}

impl AgentContext {
    pub fn render(&self, renderer: &PromptRenderer) -> Result<RenderedPrompt> {
        Ok(RenderedPrompt {
            system: renderer.render_named(templates::AGENT_SYSTEM, self)?,
            user: renderer.render_named(templates::AGENT_TURN, self)?,
        })
    }

    /// Shrink the context until the rendered prompt fits `limit` tokens.
    ///
    /// Oldest transcript lines go first, then the oldest memories, then the
    /// environment state is thinned: the first entry of its longest list,
    /// and once no list is left, the longest string is halved. Task and
    /// instructions are never touched. Returns how many steps were taken.
    pub fn truncate_to(&mut self, renderer: &PromptRenderer, limit: usize) -> Result<usize> {
        let mut dropped = 0;

        loop {
            let estimate = self.render(renderer)?.estimated_tokens();
            if estimate <= limit {
                break;
            }
            let trimmed = if !self.history.is_empty() {
                self.history.remove(0);
                true
            } else if !self.memory.is_empty() {
                self.memory.remove(0);
                true
            } else {
                trim_state(&mut self.state)
            };
            if !trimmed {
                log::warn!(
                    "Context for {} is still {} tokens after truncation (limit {})",
                    self.agent_id,
                    estimate,
                    limit
                );
                break;
            }
            dropped += 1;
        }

        if dropped > 0 {
            log::debug!(
                "Truncated {} context entries for {} to fit {} tokens",
                dropped,
                self.agent_id,
                limit
            );
        }
        Ok(dropped)
    }
}

/// Strings at or below this length are left whole
const MIN_TRIM_CHARS: usize = 16;

fn pretty_state<S: Serializer>(state: &Value, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match state {
        Value::Null => serializer.serialize_str(""),
        other => serializer.serialize_str(&serde_json::to_string_pretty(other).unwrap_or_default()),
    }
}

/// One shrinking step on the state. False when nothing is left to shrink.
fn trim_state(state: &mut Value) -> bool {
    if let Some(list) = longest_array(state) {
        list.remove(0);
        return true;
    }
    match longest_string(state) {
        Some(text) => {
            let keep = text.chars().count() / 2;
            let mut halved: String = text.chars().take(keep).collect();
            halved.push('…');
            *text = halved;
            true
        }
        None => false,
    }
}

fn longest_array(value: &mut Value) -> Option<&mut Vec<Value>> {
    let mut best: Option<&mut Vec<Value>> = None;
    let mut stack = vec![value];
    while let Some(node) = stack.pop() {
        match node {
            Value::Array(items) if !items.is_empty() => {
                if best.as_ref().is_none_or(|b| items.len() > b.len()) {
                    best = Some(items);
                }
            }
            Value::Object(map) => stack.extend(map.values_mut()),
            _ => {}
        }
    }
    best
}

fn longest_string(value: &mut Value) -> Option<&mut String> {
    let mut best: Option<&mut String> = None;
    let mut stack = vec![value];
    while let Some(node) = stack.pop() {
        match node {
            Value::String(text) if text.chars().count() > MIN_TRIM_CHARS => {
                if best.as_ref().is_none_or(|b| text.len() > b.len()) {
                    best = Some(text);
                }
            }
            Value::Array(items) => stack.extend(items.iter_mut()),
            Value::Object(map) => stack.extend(map.values_mut()),
            _ => {}
        }
    }
    best
}
