//! Bargaining: agents trade offers until one accepts the other's latest offer

use serde::Serialize;

use super::{ActionPayload, unsupported};

const ALLOWED: &[&str] = &["offer", "accept", "reject"];

/// One offer on the table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offer {
    pub agent: String,
    pub value: f64,
    pub turn: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BargainingState {
    pub offer_range: (f64, f64),
    pub offers: Vec<Offer>,
    pub rejections: u32,
    pub accepted: bool,
    pub accepted_by: Option<String>,
    pub agreed_value: Option<f64>,
}

impl BargainingState {
    pub fn new(offer_range: (f64, f64)) -> Self {
        Self {
            offer_range,
            offers: Vec::new(),
            rejections: 0,
            accepted: false,
            accepted_by: None,
            agreed_value: None,
        }
    }

    /// Latest offer made by someone other than `agent_id`
    pub fn standing_offer_for(&self, agent_id: &str) -> Option<&Offer> {
        self.offers.last().filter(|o| o.agent != agent_id)
    }

    pub fn instructions(&self, role: &str) -> String {
        let (lo, hi) = self.offer_range;
        let mut text = format!(
            "You are the {role} in a negotiation. Each turn reply with one JSON object:\n\
             - {{\"action\": \"offer\", \"value\": <number between {lo} and {hi}>, \"message\": \"...\"}}\n\
             - {{\"action\": \"accept\", \"message\": \"...\"}} to accept the other side's latest offer\n\
             - {{\"action\": \"reject\", \"message\": \"...\"}} to refuse without a counter-offer\n\
             The negotiation ends as soon as an offer is accepted."
        );
        if let Some(last) = self.offers.last() {
            text.push_str(&format!("\nLatest offer on the table: {} from {}.", last.value, last.agent));
        }
        text
    }

    pub fn validate(&self, agent_id: &str, payload: &ActionPayload) -> Result<(), String> {
        match payload {
            ActionPayload::Offer { value, .. } => {
                let (lo, hi) = self.offer_range;
                if !value.is_finite() || *value < lo || *value > hi {
                    return Err(format!("Offer {} is outside the allowed range [{}, {}].", value, lo, hi));
                }
                Ok(())
            }
            ActionPayload::Accept { .. } => match self.standing_offer_for(agent_id) {
                Some(_) => Ok(()),
                None => Err("There is no offer from the other side to accept yet. Make an offer instead.".to_string()),
            },
            ActionPayload::Reject { .. } => Ok(()),
            other => Err(unsupported(other, ALLOWED)),
        }
    }

    pub(super) fn apply(&mut self, agent_id: &str, payload: &ActionPayload, turn: u32) {
        match payload {
            ActionPayload::Offer { value, .. } => {
                log::debug!("{} offers {} on turn {}", agent_id, value, turn);
                self.offers.push(Offer {
                    agent: agent_id.to_string(),
                    value: *value,
                    turn,
                });
            }
            ActionPayload::Accept { .. } => {
                self.agreed_value = self.standing_offer_for(agent_id).map(|o| o.value);
                self.accepted = true;
                self.accepted_by = Some(agent_id.to_string());
                log::debug!("{} accepts {:?} on turn {}", agent_id, self.agreed_value, turn);
            }
            ActionPayload::Reject { .. } => self.rejections += 1,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(value: f64) -> ActionPayload {
        ActionPayload::Offer {
            value,
            message: String::new(),
        }
    }

    fn accept() -> ActionPayload {
        ActionPayload::Accept { message: String::new() }
    }

    #[test]
    fn test_out_of_range_offer_is_invalid() {
        let state = BargainingState::new((0.0, 100.0));
        assert!(state.validate("seller", &offer(60.0)).is_ok());
        let err = state.validate("seller", &offer(120.0)).unwrap_err();
        assert!(err.contains("outside"));
        assert!(state.validate("seller", &offer(-1.0)).is_err());
    }

    #[test]
    fn test_accept_needs_counterparty_offer() {
        let mut state = BargainingState::new((0.0, 100.0));
        assert!(state.validate("buyer", &accept()).is_err());

        state.apply("seller", &offer(60.0), 1);
        assert!(state.validate("seller", &accept()).is_err());
        assert!(state.validate("buyer", &accept()).is_ok());
    }

    #[test]
    fn test_accept_records_agreement() {
        let mut state = BargainingState::new((0.0, 100.0));
        state.apply("seller", &offer(60.0), 1);
        state.apply("buyer", &offer(50.0), 1);
        state.apply("seller", &accept(), 2);

        assert!(state.accepted);
        assert_eq!(state.agreed_value, Some(50.0));
        assert_eq!(state.accepted_by.as_deref(), Some("seller"));
        assert_eq!(state.offers.len(), 2);
    }

    #[test]
    fn test_instructions_mention_range_and_latest_offer() {
        let mut state = BargainingState::new((10.0, 90.0));
        state.apply("seller", &offer(60.0), 1);
        let text = state.instructions("Buyer");
        assert!(text.contains("between 10 and 90"));
        assert!(text.contains("60 from seller"));
    }

    #[test]
    fn test_patch_is_not_a_bargaining_action() {
        let state = BargainingState::new((0.0, 100.0));
        let patch = ActionPayload::Patch {
            content: "x".to_string(),
            message: String::new(),
        };
        assert!(state.validate("a", &patch).unwrap_err().contains("offer"));
    }
}
