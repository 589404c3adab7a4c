//! Environments: the typed simulation context of a run.
//!
//! A closed set of variants shares one lifecycle:
//! `Pending -> Active{turn} -> Terminated{reason}`. Each variant defines the
//! actions it accepts, how they change its state and when it ends on its own.

mod bargaining;
mod coding;
mod discourse;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use bargaining::{BargainingState, Offer};
pub use coding::{CodingState, Note};
pub use discourse::{DiscourseEntry, ResearchState, WorldState};

use crate::config::{RosterEntry, TaskConfig};
use crate::error::{MarbleError, Result};
use crate::transcript::Action;

/// Environment variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    Bargaining,
    Research,
    Coding,
    WorldSimulation,
}

impl EnvironmentKind {
    /// Smallest roster the variant can run with
    pub fn min_agents(&self) -> usize {
        match self {
            EnvironmentKind::Bargaining => 2,
            _ => 1,
        }
    }

    /// Whether one agent's action must be visible before the next agent acts
    pub fn requires_sequential(&self) -> bool {
        matches!(self, EnvironmentKind::Bargaining | EnvironmentKind::Coding)
    }

    /// Whether a reply without an action object is taken as plain prose
    pub fn accepts_prose(&self) -> bool {
        matches!(self, EnvironmentKind::Research | EnvironmentKind::WorldSimulation)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentKind::Bargaining => "bargaining",
            EnvironmentKind::Research => "research",
            EnvironmentKind::Coding => "coding",
            EnvironmentKind::WorldSimulation => "world_simulation",
        }
    }
}

impl FromStr for EnvironmentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect();
        let normalized = normalized.strip_suffix("env").unwrap_or(&normalized);
        match normalized {
            "bargaining" => Ok(EnvironmentKind::Bargaining),
            "research" | "training" => Ok(EnvironmentKind::Research),
            "coding" => Ok(EnvironmentKind::Coding),
            "world" | "worldsimulation" => Ok(EnvironmentKind::WorldSimulation),
            _ => Err(format!("unknown environment type '{}'", s)),
        }
    }
}

impl fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationReason {
    /// The environment's own end condition was met
    Explicit,
    /// The iteration cap (or run timeout) was reached
    Cap,
    /// Unrecoverable agent, model or environment failure
    Failure,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::Explicit => "explicit",
            TerminationReason::Cap => "cap",
            TerminationReason::Failure => "failure",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle shared by every environment variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum Lifecycle {
    Pending,
    Active { turn: u32 },
    Terminated { reason: TerminationReason, turn: u32 },
}

impl Lifecycle {
    /// Check if this is a terminal phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, Lifecycle::Terminated { .. })
    }
}

/// Typed payload of an action.
///
/// Models answer with a JSON object whose `action` field selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionPayload {
    Offer {
        value: f64,
        #[serde(default)]
        message: String,
    },
    Accept {
        #[serde(default)]
        message: String,
    },
    Reject {
        #[serde(default)]
        message: String,
    },
    Patch {
        content: String,
        #[serde(default)]
        message: String,
    },
    Submit {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        message: String,
    },
    Comment {
        #[serde(default)]
        message: String,
    },
    Contribute {
        #[serde(default)]
        message: String,
        #[serde(default)]
        idea: Option<String>,
    },
    Act {
        #[serde(default)]
        message: String,
        #[serde(default)]
        fact: Option<String>,
    },
}

impl ActionPayload {
    pub fn name(&self) -> &'static str {
        match self {
            ActionPayload::Offer { .. } => "offer",
            ActionPayload::Accept { .. } => "accept",
            ActionPayload::Reject { .. } => "reject",
            ActionPayload::Patch { .. } => "patch",
            ActionPayload::Submit { .. } => "submit",
            ActionPayload::Comment { .. } => "comment",
            ActionPayload::Contribute { .. } => "contribute",
            ActionPayload::Act { .. } => "act",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ActionPayload::Offer { message, .. }
            | ActionPayload::Accept { message }
            | ActionPayload::Reject { message }
            | ActionPayload::Patch { message, .. }
            | ActionPayload::Submit { message, .. }
            | ActionPayload::Comment { message }
            | ActionPayload::Contribute { message, .. }
            | ActionPayload::Act { message, .. } => message,
        }
    }

    /// One-line rendering used in agent context and judge prompts
    pub fn summary(&self) -> String {
        let head = match self {
            ActionPayload::Offer { value, .. } => format!("offer {}", value),
            ActionPayload::Patch { content, .. } => format!("patch ({} chars)", content.len()),
            ActionPayload::Submit { content: Some(c), .. } => format!("submit ({} chars)", c.len()),
            ActionPayload::Contribute { idea: Some(idea), .. } => format!("contribute idea: {}", idea),
            ActionPayload::Act { fact: Some(fact), .. } => format!("act fact: {}", fact),
            other => other.name().to_string(),
        };
        let message = self.message().trim();
        if message.is_empty() {
            head
        } else {
            format!("{}: {}", head, message)
        }
    }
}

/// A model reply that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAction {
    pub payload: ActionPayload,
    /// Recipients the agent asked for (empty means everyone it may address)
    pub requested: Vec<String>,
}

/// Variant state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EnvironmentState {
    Bargaining(BargainingState),
    Coding(CodingState),
    Research(ResearchState),
    WorldSimulation(WorldState),
}

/// One run's environment. Owned and mutated only by the run loop.
#[derive(Debug, Clone)]
pub struct Environment {
    kind: EnvironmentKind,
    name: String,
    max_iterations: u32,
    lifecycle: Lifecycle,
    state: EnvironmentState,
}

impl Environment {
    pub fn new(kind: EnvironmentKind, name: impl Into<String>, max_iterations: u32, offer_range: (f64, f64)) -> Self {
        let state = match kind {
            EnvironmentKind::Bargaining => EnvironmentState::Bargaining(BargainingState::new(offer_range)),
            EnvironmentKind::Coding => EnvironmentState::Coding(CodingState::default()),
            EnvironmentKind::Research => EnvironmentState::Research(ResearchState::default()),
            EnvironmentKind::WorldSimulation => EnvironmentState::WorldSimulation(WorldState::default()),
        };
        Self {
            kind,
            name: name.into(),
            max_iterations,
            lifecycle: Lifecycle::Pending,
            state,
        }
    }

    /// Build the environment a task config describes
    pub fn from_config(config: &TaskConfig) -> Result<Self> {
        let kind = config.environment_kind()?;
        let name = config
            .environment
            .name
            .clone()
            .unwrap_or_else(|| kind.as_str().to_string());
        Ok(Self::new(kind, name, config.max_iterations()?, config.offer_range()?))
    }

    pub fn kind(&self) -> EnvironmentKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn state(&self) -> &EnvironmentState {
        &self.state
    }

    /// Current turn (0 before the run starts)
    pub fn turn(&self) -> u32 {
        match self.lifecycle {
            Lifecycle::Pending => 0,
            Lifecycle::Active { turn } | Lifecycle::Terminated { turn, .. } => turn,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.lifecycle.is_terminal()
    }

    /// Pending -> Active{1}
    pub fn start(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Pending => {
                self.lifecycle = Lifecycle::Active { turn: 1 };
                Ok(())
            }
            other => Err(MarbleError::InvalidState(format!("cannot start environment in {:?}", other))),
        }
    }

    /// Active{t} -> Active{t+1}
    pub fn advance(&mut self) -> Result<u32> {
        match self.lifecycle {
            Lifecycle::Active { turn } if turn < self.max_iterations => {
                self.lifecycle = Lifecycle::Active { turn: turn + 1 };
                Ok(turn + 1)
            }
            other => Err(MarbleError::InvalidState(format!("cannot advance environment in {:?}", other))),
        }
    }

    /// Set the termination flag. A flag that is already set is kept.
    pub fn terminate(&mut self, reason: TerminationReason) -> Lifecycle {
        if !self.lifecycle.is_terminal() {
            self.lifecycle = Lifecycle::Terminated {
                reason,
                turn: self.turn(),
            };
        }
        self.lifecycle
    }

    /// Termination predicate: the variant's own end condition
    pub fn explicit_end(&self) -> bool {
        match &self.state {
            EnvironmentState::Bargaining(s) => s.accepted,
            EnvironmentState::Coding(s) => s.submitted,
            EnvironmentState::Research(_) | EnvironmentState::WorldSimulation(_) => false,
        }
    }

    /// Action instructions for one agent
    pub fn instructions(&self, agent: &RosterEntry) -> String {
        match &self.state {
            EnvironmentState::Bargaining(s) => s.instructions(&agent.role),
            EnvironmentState::Coding(_) => coding::INSTRUCTIONS.to_string(),
            EnvironmentState::Research(_) => discourse::RESEARCH_INSTRUCTIONS.to_string(),
            EnvironmentState::WorldSimulation(_) => discourse::WORLD_INSTRUCTIONS.to_string(),
        }
    }

    /// Parse a model reply and validate it against the current state.
    ///
    /// The error string is a hint that goes back to the agent.
    pub fn parse_action(&self, agent_id: &str, text: &str) -> std::result::Result<ParsedAction, String> {
        let object = extract_json_object(text);
        let parsed = match (object, self.kind) {
            (Some(value), kind) if value.get("action").is_some() || !kind.accepts_prose() => parse_value(value)?,
            // Discourse environments take prose, even prose quoting JSON
            (_, EnvironmentKind::Research) => ParsedAction {
                payload: ActionPayload::Contribute {
                    message: text.trim().to_string(),
                    idea: None,
                },
                requested: Vec::new(),
            },
            (_, EnvironmentKind::WorldSimulation) => ParsedAction {
                payload: ActionPayload::Act {
                    message: text.trim().to_string(),
                    fact: None,
                },
                requested: Vec::new(),
            },
            _ => return Err("Reply with a single JSON object containing an \"action\" field.".to_string()),
        };
        self.validate(agent_id, &parsed.payload)?;
        Ok(parsed)
    }

    /// Check an action against the current state without applying it
    pub fn validate(&self, agent_id: &str, payload: &ActionPayload) -> std::result::Result<(), String> {
        if self.is_terminated() {
            return Err("the environment has already terminated".to_string());
        }
        match &self.state {
            EnvironmentState::Bargaining(s) => s.validate(agent_id, payload),
            EnvironmentState::Coding(s) => s.validate(payload),
            EnvironmentState::Research(_) => discourse::validate_research(payload),
            EnvironmentState::WorldSimulation(_) => discourse::validate_world(payload),
        }
    }

    /// Transition function: apply one validated action
    pub fn apply(&mut self, agent_id: &str, payload: &ActionPayload) -> Result<()> {
        self.validate(agent_id, payload).map_err(MarbleError::Environment)?;
        let turn = self.turn();
        match &mut self.state {
            EnvironmentState::Bargaining(s) => s.apply(agent_id, payload, turn),
            EnvironmentState::Coding(s) => s.apply(agent_id, payload, turn),
            EnvironmentState::Research(s) => s.apply(agent_id, payload, turn),
            EnvironmentState::WorldSimulation(s) => s.apply(agent_id, payload, turn),
        }
        Ok(())
    }

    /// Re-apply recorded actions turn by turn against this (fresh) environment
    pub fn replay<'a>(&mut self, actions: impl IntoIterator<Item = &'a Action>) -> Result<()> {
        self.start()?;
        for action in actions {
            while self.turn() < action.turn {
                self.advance()?;
            }
            self.apply(&action.sender, &action.payload)?;
        }
        Ok(())
    }

    /// JSON snapshot of the variant state
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(&self.state).unwrap_or(serde_json::Value::Null)
    }
}

/// Find the JSON object between the first `{` and the last `}`
fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn parse_value(mut value: serde_json::Value) -> std::result::Result<ParsedAction, String> {
    let object = value
        .as_object_mut()
        .ok_or_else(|| "The reply must be a JSON object.".to_string())?;

    let requested = match object.remove("to") {
        Some(serde_json::Value::String(id)) => vec![id],
        Some(serde_json::Value::Array(ids)) => ids
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    match object.get_mut("action") {
        Some(serde_json::Value::String(name)) => *name = name.trim().to_lowercase(),
        _ => return Err("The JSON object needs an \"action\" field.".to_string()),
    }

    let payload: ActionPayload =
        serde_json::from_value(value).map_err(|e| format!("The action could not be read: {}.", e))?;
    Ok(ParsedAction { payload, requested })
}

/// Hint listing the actions a variant accepts
fn unsupported(payload: &ActionPayload, allowed: &[&str]) -> String {
    format!(
        "Action \"{}\" is not available here. Use one of: {}.",
        payload.name(),
        allowed.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn research(max: u32) -> Environment {
        Environment::new(EnvironmentKind::Research, "lab", max, (0.0, 100.0))
    }

    #[test]
    fn test_kind_aliases() {
        assert_eq!("Bargaining".parse::<EnvironmentKind>().unwrap(), EnvironmentKind::Bargaining);
        assert_eq!("World".parse::<EnvironmentKind>().unwrap(), EnvironmentKind::WorldSimulation);
        assert_eq!("world_simulation".parse::<EnvironmentKind>().unwrap(), EnvironmentKind::WorldSimulation);
        assert_eq!("ResearchEnv".parse::<EnvironmentKind>().unwrap(), EnvironmentKind::Research);
        assert!("chess".parse::<EnvironmentKind>().is_err());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut env = research(2);
        assert_eq!(env.lifecycle(), Lifecycle::Pending);
        assert_eq!(env.turn(), 0);

        env.start().unwrap();
        assert_eq!(env.lifecycle(), Lifecycle::Active { turn: 1 });
        assert!(env.start().is_err());

        assert_eq!(env.advance().unwrap(), 2);
        assert!(env.advance().is_err());

        env.terminate(TerminationReason::Cap);
        assert_eq!(
            env.lifecycle(),
            Lifecycle::Terminated {
                reason: TerminationReason::Cap,
                turn: 2
            }
        );
    }

    #[test]
    fn test_termination_flag_is_never_cleared() {
        let mut env = research(5);
        env.start().unwrap();
        env.terminate(TerminationReason::Failure);
        env.terminate(TerminationReason::Explicit);
        assert!(matches!(
            env.lifecycle(),
            Lifecycle::Terminated {
                reason: TerminationReason::Failure,
                ..
            }
        ));
        assert!(env.advance().is_err());
    }

    #[test]
    fn test_parse_action_extracts_embedded_json() {
        let mut env = Environment::new(EnvironmentKind::Coding, "c", 3, (0.0, 1.0));
        env.start().unwrap();
        let text = "Here is my move:\n```json\n{\"action\": \"SUBMIT\", \"content\": \"fn main() {}\", \"to\": \"b\"}\n```";
        let parsed = env.parse_action("a", text).unwrap();
        assert_eq!(parsed.payload.name(), "submit");
        assert_eq!(parsed.requested, vec!["b".to_string()]);
    }

    #[test]
    fn test_parse_action_without_json() {
        let mut env = Environment::new(EnvironmentKind::Coding, "c", 3, (0.0, 1.0));
        env.start().unwrap();
        assert!(env.parse_action("a", "I will submit now").is_err());

        let mut env = research(3);
        env.start().unwrap();
        let parsed = env.parse_action("a", "  We should survey prior work.  ").unwrap();
        assert_eq!(
            parsed.payload,
            ActionPayload::Contribute {
                message: "We should survey prior work.".to_string(),
                idea: None
            }
        );
    }

    #[test]
    fn test_parse_action_missing_action_field() {
        let mut env = Environment::new(EnvironmentKind::Coding, "c", 3, (0.0, 1.0));
        env.start().unwrap();
        let err = env.parse_action("a", r#"{"message": "hi"}"#).unwrap_err();
        assert!(err.contains("action"));
    }

    #[test]
    fn test_prose_quoting_json_is_a_contribution() {
        let mut env = research(3);
        env.start().unwrap();
        let text = r#"I propose we sweep {"lr": 0.01} against a cosine schedule."#;
        let parsed = env.parse_action("a", text).unwrap();
        assert_eq!(
            parsed.payload,
            ActionPayload::Contribute {
                message: text.to_string(),
                idea: None
            }
        );
    }

    #[test]
    fn test_wrong_variant_action_is_rejected() {
        let mut env = research(3);
        env.start().unwrap();
        let err = env.parse_action("a", r#"{"action": "offer", "value": 10}"#).unwrap_err();
        assert!(err.contains("contribute"));
    }

    #[test]
    fn test_apply_after_termination_fails() {
        let mut env = research(3);
        env.start().unwrap();
        env.terminate(TerminationReason::Cap);
        let payload = ActionPayload::Contribute {
            message: "late".to_string(),
            idea: None,
        };
        assert!(matches!(env.apply("a", &payload), Err(MarbleError::Environment(_))));
    }

    #[test]
    fn test_summary() {
        let offer = ActionPayload::Offer {
            value: 60.0,
            message: "fair price".to_string(),
        };
        assert_eq!(offer.summary(), "offer 60: fair price");
        let accept = ActionPayload::Accept { message: String::new() };
        assert_eq!(accept.summary(), "accept");
    }
}
