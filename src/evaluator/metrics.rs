//! Metrics: judge verdicts and the scores derived from them

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reward weights: planning, communication, individual contribution
pub const PLANNING_WEIGHT: f64 = 0.4;
pub const COMMUNICATION_WEIGHT: f64 = 0.3;
pub const CONTRIBUTION_WEIGHT: f64 = 0.3;

/// Judge scores run from 1 to 5
const SCORE_MAX: f64 = 5.0;

/// Score assumed when a turn's feedback carries none
pub const NEUTRAL_SCORE: f64 = 3.0;

/// Outcome of scoring a run. A failed judge call is never a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Metrics {
    Scored(Scorecard),
    Unscored { reason: String },
}

impl Metrics {
    pub fn unscored(reason: impl Into<String>) -> Self {
        Metrics::Unscored { reason: reason.into() }
    }

    pub fn scorecard(&self) -> Option<&Scorecard> {
        match self {
            Metrics::Scored(card) => Some(card),
            Metrics::Unscored { .. } => None,
        }
    }
}

/// Judge output plus derived scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub judge: String,
    pub criteria: BTreeMap<String, f64>,
    /// Per-turn scores (feedback mode) followed by the final score
    pub planning_scores: Vec<f64>,
    pub communication_scores: Vec<f64>,
    pub total_milestones: u32,
    pub agent_kpis: BTreeMap<String, u32>,
    pub task_score: f64,
    pub coordination_score: f64,
    pub agent_rewards: BTreeMap<String, f64>,
    #[serde(default)]
    pub summary: String,
}

/// Final judge reply
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    pub planning: f64,
    pub communication: f64,
    #[serde(default)]
    pub total_milestones: u32,
    #[serde(default)]
    pub milestones: BTreeMap<String, u32>,
    #[serde(default)]
    pub summary: String,
}

impl Verdict {
    /// Parse the JSON object embedded in a judge reply and check it
    pub fn parse(text: &str, criteria: &[String]) -> Result<Self, String> {
        let verdict: Verdict = parse_embedded(text)?;
        for criterion in criteria {
            match verdict.scores.get(criterion) {
                Some(score) => check_score(criterion, *score)?,
                None => return Err(format!("verdict has no score for '{}'", criterion)),
            }
        }
        check_score("planning", verdict.planning)?;
        check_score("communication", verdict.communication)?;
        Ok(verdict)
    }
}

/// Per-turn coaching reply
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FeedbackVerdict {
    #[serde(default)]
    pub agents: BTreeMap<String, String>,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub planning: Option<f64>,
    #[serde(default)]
    pub communication: Option<f64>,
    #[serde(default)]
    pub total_milestones: u32,
    #[serde(default)]
    pub milestones: BTreeMap<String, u32>,
}

impl FeedbackVerdict {
    pub fn parse(text: &str) -> Result<Self, String> {
        let verdict: FeedbackVerdict = parse_embedded(text)?;
        if verdict.agents.is_empty() && verdict.team.trim().is_empty() {
            return Err("feedback reply has no advice".to_string());
        }
        Ok(verdict)
    }
}

fn parse_embedded<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, String> {
    let start = text.find('{').ok_or("reply contains no JSON object")?;
    let end = text.rfind('}').ok_or("reply contains no JSON object")?;
    if end < start {
        return Err("reply contains no JSON object".to_string());
    }
    serde_json::from_str(&text[start..=end]).map_err(|e| format!("malformed verdict: {}", e))
}

fn check_score(name: &str, score: f64) -> Result<(), String> {
    if (1.0..=SCORE_MAX).contains(&score) {
        Ok(())
    } else {
        Err(format!("score for '{}' is {}, expected 1-5", name, score))
    }
}

/// TS: achieved milestones over (total milestones x agents)
pub fn task_score(agent_kpis: &BTreeMap<String, u32>, total_milestones: u32, agents: usize) -> f64 {
    let denominator = total_milestones as f64 * agents as f64;
    if denominator <= 0.0 {
        return 0.0;
    }
    let achieved: u32 = agent_kpis.values().sum();
    round4(achieved as f64 / denominator)
}

/// Mean of the positive scores; negatives count as 0
fn positive_mean(scores: &[f64]) -> f64 {
    let positive: Vec<f64> = scores.iter().copied().filter(|s| *s > 0.0).collect();
    if positive.is_empty() {
        return 0.0;
    }
    positive.iter().sum::<f64>() / positive.len() as f64
}

/// CS: mean of planning and communication averages, planning alone when
/// there is no communication score
pub fn coordination_score(planning: &[f64], communication: &[f64]) -> f64 {
    let planning = positive_mean(planning);
    let communication = positive_mean(communication);
    if communication == 0.0 {
        round4(planning)
    } else {
        round4((planning + communication) / 2.0)
    }
}

/// Per-agent reward from the latest planning/communication scores and the
/// agent's share of the milestones, clipped to [0, 1]
pub fn agent_reward(planning: f64, communication: f64, contribution: f64) -> f64 {
    let reward = PLANNING_WEIGHT * planning.max(0.0) / SCORE_MAX
        + COMMUNICATION_WEIGHT * communication.max(0.0) / SCORE_MAX
        + CONTRIBUTION_WEIGHT * contribution;
    round4(reward.clamp(0.0, 1.0))
}

/// Share of the milestones one agent achieved, 0 when nothing was counted
pub fn contribution(achieved: u32, total_milestones: u32) -> f64 {
    if total_milestones == 0 {
        return 0.0;
    }
    (achieved as f64 / total_milestones as f64).min(1.0)
}

/// Agents ordered by contribution, largest first; ties keep id order
pub fn contribution_ranking(agent_kpis: &BTreeMap<String, u32>, total_milestones: u32) -> Vec<(String, f64)> {
    let mut ranking: Vec<(String, f64)> = agent_kpis
        .iter()
        .map(|(id, achieved)| (id.clone(), round4(contribution(*achieved, total_milestones))))
        .collect();
    ranking.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranking
}

/// Plain-language breakdown of one agent's reward
pub fn reward_explanation(planning: f64, communication: f64, contribution: f64, reward: f64) -> String {
    format!(
        "Reward {reward:.2} = {PLANNING_WEIGHT} x planning {planning:.1}/5 + {COMMUNICATION_WEIGHT} x communication \
         {communication:.1}/5 + {CONTRIBUTION_WEIGHT} x your {:.0}% share of the milestones.",
        contribution * 100.0
    )
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

impl Scorecard {
    /// Derive the scorecard for a roster from a verdict and earlier per-turn scores
    pub fn from_verdict(
        judge: &str,
        verdict: Verdict,
        agents: &[String],
        mut planning_scores: Vec<f64>,
        mut communication_scores: Vec<f64>,
    ) -> Self {
        planning_scores.push(verdict.planning);
        communication_scores.push(verdict.communication);

        let agent_kpis: BTreeMap<String, u32> = agents
            .iter()
            .map(|id| (id.clone(), verdict.milestones.get(id).copied().unwrap_or(0)))
            .collect();

        let agent_rewards = agents
            .iter()
            .map(|id| {
                let achieved = agent_kpis.get(id).copied().unwrap_or(0);
                let share = contribution(achieved, verdict.total_milestones);
                (id.clone(), agent_reward(verdict.planning, verdict.communication, share))
            })
            .collect();

        Self {
            judge: judge.to_string(),
            task_score: task_score(&agent_kpis, verdict.total_milestones, agents.len()),
            coordination_score: coordination_score(&planning_scores, &communication_scores),
            criteria: verdict.scores,
            planning_scores,
            communication_scores,
            total_milestones: verdict.total_milestones,
            agent_kpis,
            agent_rewards,
            summary: verdict.summary,
        }
    }
}
