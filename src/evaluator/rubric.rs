//! Rubrics: which criteria the judge scores for each environment kind

use crate::environment::EnvironmentKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rubric {
    pub criteria: Vec<String>,
    pub guidance: &'static str,
}

impl Rubric {
    /// Enabled `metrics.*` flags win; otherwise the kind's defaults apply
    pub fn for_kind(kind: EnvironmentKind, enabled: &[String]) -> Self {
        let criteria = if enabled.is_empty() {
            default_criteria(kind).iter().map(|c| c.to_string()).collect()
        } else {
            enabled.to_vec()
        };
        Self {
            criteria,
            guidance: guidance(kind),
        }
    }
}

fn default_criteria(kind: EnvironmentKind) -> &'static [&'static str] {
    match kind {
        EnvironmentKind::Bargaining => &["agreement_quality", "negotiation_efficiency"],
        EnvironmentKind::Coding => &["correctness", "code_quality", "instruction_following"],
        EnvironmentKind::Research => &["content_accuracy", "innovation", "practical_operability"],
        EnvironmentKind::WorldSimulation => &["coherence", "goal_progress"],
    }
}

fn guidance(kind: EnvironmentKind) -> &'static str {
    match kind {
        EnvironmentKind::Bargaining => {
            "Judge whether a deal was reached, how fair the agreed value is to both sides and how quickly the parties converged."
        }
        EnvironmentKind::Coding => {
            "Judge the final artifact in the environment state: does it solve the task, is it readable, and did the team follow the requested output format."
        }
        EnvironmentKind::Research => {
            "Judge the collected ideas and discussion: are they accurate, novel and feasible to carry out."
        }
        EnvironmentKind::WorldSimulation => {
            "Judge whether the agents kept the world consistent and made progress toward the task goal."
        }
    }
}
