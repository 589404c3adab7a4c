//! Coding: agents evolve one shared artifact until someone submits it

use serde::Serialize;

use super::{ActionPayload, unsupported};

const ALLOWED: &[&str] = &["patch", "submit", "comment"];

pub(super) const INSTRUCTIONS: &str = "You are working on one shared source file. Each turn reply with one JSON object:\n\
- {\"action\": \"patch\", \"content\": \"<full new file content>\", \"message\": \"...\"} to replace the file\n\
- {\"action\": \"comment\", \"message\": \"...\"} to discuss without changing the file\n\
- {\"action\": \"submit\", \"content\": \"<optional final content>\", \"message\": \"...\"} when the solution is done\n\
The task ends as soon as the file is submitted.";

/// A review note left on the artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub agent: String,
    pub turn: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CodingState {
    pub artifact: String,
    pub revisions: u32,
    pub last_author: Option<String>,
    pub notes: Vec<Note>,
    pub submitted: bool,
    pub submitted_by: Option<String>,
}

impl CodingState {
    pub fn validate(&self, payload: &ActionPayload) -> Result<(), String> {
        match payload {
            ActionPayload::Patch { content, .. } if content.trim().is_empty() => {
                Err("A patch needs non-empty content.".to_string())
            }
            ActionPayload::Patch { .. } | ActionPayload::Comment { .. } => Ok(()),
            ActionPayload::Submit { content, .. } => {
                let has_content = content.as_deref().is_some_and(|c| !c.trim().is_empty());
                if has_content || !self.artifact.is_empty() {
                    Ok(())
                } else {
                    Err("Nothing to submit yet. Include the solution in \"content\".".to_string())
                }
            }
            other => Err(unsupported(other, ALLOWED)),
        }
    }

    pub(super) fn apply(&mut self, agent_id: &str, payload: &ActionPayload, turn: u32) {
        match payload {
            ActionPayload::Patch { content, .. } => self.replace(agent_id, content),
            ActionPayload::Submit { content, .. } => {
                if let Some(content) = content
                    && !content.trim().is_empty()
                {
                    self.replace(agent_id, content);
                }
                self.submitted = true;
                self.submitted_by = Some(agent_id.to_string());
            }
            ActionPayload::Comment { message } => self.notes.push(Note {
                agent: agent_id.to_string(),
                turn,
                message: message.clone(),
            }),
            _ => {}
        }
    }

    fn replace(&mut self, agent_id: &str, content: &str) {
        self.artifact = content.to_string();
        self.revisions += 1;
        self.last_author = Some(agent_id.to_string());
    }
}
