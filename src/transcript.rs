//! Transcript: the append-only ordered record of a run's actions

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environment::ActionPayload;

/// One agent-authored turn artifact. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub turn: u32,
    pub sender: String,
    pub role: String,
    pub recipients: BTreeSet<String>,
    pub payload: ActionPayload,
    /// Raw model text the payload was parsed from
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Action {
    /// Whether `agent_id` may see this action
    pub fn visible_to(&self, agent_id: &str) -> bool {
        self.sender == agent_id || self.recipients.contains(agent_id)
    }

    /// Context line, e.g. `[turn 2] seller -> buyer: accept`
    pub fn render(&self) -> String {
        let to: Vec<&str> = self.recipients.iter().map(String::as_str).collect();
        format!(
            "[turn {}] {} -> {}: {}",
            self.turn,
            self.sender,
            if to.is_empty() { "nobody".to_string() } else { to.join(", ") },
            self.payload.summary()
        )
    }
}

/// Append-only action log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    actions: Vec<Action>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action; turns never go backwards
    pub fn push(&mut self, action: Action) {
        debug_assert!(self.actions.last().is_none_or(|last| last.turn <= action.turn));
        self.actions.push(action);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn last(&self) -> Option<&Action> {
        self.actions.last()
    }

    /// Actions an agent can see, oldest first
    pub fn visible_to<'a>(&'a self, agent_id: &'a str) -> impl Iterator<Item = &'a Action> + 'a {
        self.actions.iter().filter(move |a| a.visible_to(agent_id))
    }

    /// Actions emitted during one turn
    pub fn turn(&self, turn: u32) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(move |a| a.turn == turn)
    }

    /// Actions sent by one agent
    pub fn sent_by<'a>(&'a self, agent_id: &'a str) -> impl Iterator<Item = &'a Action> + 'a {
        self.actions.iter().filter(move |a| a.sender == agent_id)
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn action(turn: u32, sender: &str, recipients: &[&str], message: &str) -> Action {
        Action {
            id: format!("t{}-{}", turn, sender),
            turn,
            sender: sender.to_string(),
            role: sender.to_string(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            payload: ActionPayload::Comment {
                message: message.to_string(),
            },
            content: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_visibility() {
        let mut transcript = Transcript::new();
        transcript.push(action(1, "a", &["b"], "hi b"));
        transcript.push(action(1, "c", &["a"], "hi a"));

        assert_eq!(transcript.visible_to("a").count(), 2);
        assert_eq!(transcript.visible_to("b").count(), 1);
        assert_eq!(transcript.visible_to("c").count(), 1);
        assert_eq!(transcript.sent_by("a").count(), 1);
    }

    #[test]
    fn test_turn_filter_and_len() {
        let mut transcript = Transcript::new();
        transcript.push(action(1, "a", &[], "one"));
        transcript.push(action(2, "a", &[], "two"));
        transcript.push(action(2, "b", &[], "three"));

        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.turn(2).count(), 2);
        assert_eq!(transcript.last().unwrap().content, "three");
    }

    #[test]
    fn test_render() {
        let a = action(2, "seller", &["buyer"], "deal");
        assert_eq!(a.render(), "[turn 2] seller -> buyer: comment: deal");
        let lonely = action(1, "solo", &[], "");
        assert_eq!(lonely.render(), "[turn 1] solo -> nobody: comment");
    }

    #[test]
    fn test_serializes_as_plain_list() {
        let mut transcript = Transcript::new();
        transcript.push(action(1, "a", &["b"], "x"));
        let value = serde_json::to_value(&transcript).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["payload"]["action"], "comment");
    }
}
