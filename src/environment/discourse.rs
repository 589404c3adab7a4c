//! Discourse environments (Research, WorldSimulation).
//!
//! No terminal action: the run ends at the iteration cap.

use serde::Serialize;

use super::{ActionPayload, unsupported};

pub(super) const RESEARCH_INSTRUCTIONS: &str = "You are collaborating with other researchers on the task. Each turn reply with one JSON object:\n\
{\"action\": \"contribute\", \"message\": \"<your contribution>\", \"idea\": \"<optional new research idea>\", \"to\": [\"<optional agent ids>\"]}";

pub(super) const WORLD_INSTRUCTIONS: &str = "You are acting inside a shared simulated world. Each turn reply with one JSON object:\n\
{\"action\": \"act\", \"message\": \"<what you do or say>\", \"fact\": \"<optional new fact about the world>\", \"to\": [\"<optional agent ids>\"]}";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscourseEntry {
    pub agent: String,
    pub turn: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResearchState {
    pub discourse: Vec<DiscourseEntry>,
    pub ideas: Vec<String>,
}

impl ResearchState {
    pub(super) fn apply(&mut self, agent_id: &str, payload: &ActionPayload, turn: u32) {
        if let ActionPayload::Contribute { message, idea } = payload {
            push_entry(&mut self.discourse, agent_id, turn, message);
            push_unique(&mut self.ideas, idea.as_deref());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorldState {
    pub discourse: Vec<DiscourseEntry>,
    pub facts: Vec<String>,
}

impl WorldState {
    pub(super) fn apply(&mut self, agent_id: &str, payload: &ActionPayload, turn: u32) {
        if let ActionPayload::Act { message, fact } = payload {
            push_entry(&mut self.discourse, agent_id, turn, message);
            push_unique(&mut self.facts, fact.as_deref());
        }
    }
}

pub(super) fn validate_research(payload: &ActionPayload) -> Result<(), String> {
    match payload {
        ActionPayload::Contribute { .. } => Ok(()),
        other => Err(unsupported(other, &["contribute"])),
    }
}

pub(super) fn validate_world(payload: &ActionPayload) -> Result<(), String> {
    match payload {
        ActionPayload::Act { .. } => Ok(()),
        other => Err(unsupported(other, &["act"])),
    }
}

fn push_entry(discourse: &mut Vec<DiscourseEntry>, agent_id: &str, turn: u32, message: &str) {
    discourse.push(DiscourseEntry {
        agent: agent_id.to_string(),
        turn,
        message: message.to_string(),
    });
}

fn push_unique(list: &mut Vec<String>, item: Option<&str>) {
    if let Some(item) = item.map(str::trim)
        && !item.is_empty()
        && !list.iter().any(|existing| existing == item)
    {
        list.push(item.to_string());
    }
}
