//! Evaluator: LLM-as-judge scoring of a run.
//!
//! After the run (and after every turn in feedback mode) a designated judge
//! model reads the transcript and final state and answers with a JSON
//! verdict. Anything that prevents a verdict is reported as
//! [`Metrics::Unscored`]; it is never replaced with a default number.

mod metrics;
mod rubric;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

pub use metrics::{
    COMMUNICATION_WEIGHT, CONTRIBUTION_WEIGHT, FeedbackVerdict, Metrics, NEUTRAL_SCORE, PLANNING_WEIGHT, Scorecard,
    Verdict, agent_reward, contribution, contribution_ranking, coordination_score, reward_explanation, task_score,
};
pub use rubric::Rubric;

use crate::config::{EngineOptions, RosterEntry, TaskConfig};
use crate::environment::{Environment, EnvironmentKind};
use crate::error::Result;
use crate::llm::{CompletionRequest, ModelBinding, ProviderRegistry, RetryPolicy, Usage};
use crate::prompt::{PromptRenderer, templates};
use crate::transcript::{Action, Transcript};

const JUDGE_SYSTEM_PROMPT: &str =
    "You are a strict, impartial evaluator of multi-agent runs. Answer only with the requested JSON object.";

/// Commentary produced after one turn in feedback mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnFeedback {
    pub turn: u32,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub agents: BTreeMap<String, String>,
    pub planning: Option<f64>,
    pub communication: Option<f64>,
    /// Reward per roster agent from this turn's scores and milestone counts
    #[serde(default)]
    pub rewards: BTreeMap<String, f64>,
    /// Agents by share of the milestones, largest first
    #[serde(default)]
    pub contribution_ranking: Vec<(String, f64)>,
    #[serde(default)]
    pub explanations: BTreeMap<String, String>,
    /// Set when no feedback could be obtained for this turn
    pub error: Option<String>,
}

impl TurnFeedback {
    fn failed(turn: u32, reason: String) -> Self {
        Self {
            turn,
            team: String::new(),
            agents: BTreeMap::new(),
            planning: None,
            communication: None,
            rewards: BTreeMap::new(),
            contribution_ranking: Vec::new(),
            explanations: BTreeMap::new(),
            error: Some(reason),
        }
    }

    /// Feedback for one turn, with rewards for every agent in `agents`.
    /// Missing scores count as neutral.
    fn from_verdict(turn: u32, verdict: FeedbackVerdict, agents: &[String]) -> Self {
        let planning = verdict.planning.filter(|s| (1.0..=5.0).contains(s));
        let communication = verdict.communication.filter(|s| (1.0..=5.0).contains(s));
        let latest_planning = planning.unwrap_or(NEUTRAL_SCORE);
        let latest_communication = communication.unwrap_or(NEUTRAL_SCORE);

        let kpis: BTreeMap<String, u32> = agents
            .iter()
            .map(|id| (id.clone(), verdict.milestones.get(id).copied().unwrap_or(0)))
            .collect();

        let mut rewards = BTreeMap::new();
        let mut explanations = BTreeMap::new();
        for (id, achieved) in &kpis {
            let share = contribution(*achieved, verdict.total_milestones);
            let reward = agent_reward(latest_planning, latest_communication, share);
            explanations.insert(
                id.clone(),
                reward_explanation(latest_planning, latest_communication, share, reward),
            );
            rewards.insert(id.clone(), reward);
        }

        Self {
            turn,
            team: verdict.team,
            agents: verdict.agents,
            planning,
            communication,
            rewards,
            contribution_ranking: contribution_ranking(&kpis, verdict.total_milestones),
            explanations,
            error: None,
        }
    }

    /// Text injected into one agent's next context
    pub fn for_agent(&self, agent_id: &str) -> Option<String> {
        if self.error.is_some() {
            return None;
        }
        let mut parts = Vec::new();
        if let Some(advice) = self.agents.get(agent_id).filter(|a| !a.trim().is_empty()) {
            parts.push(format!("For you (turn {}): {}", self.turn, advice.trim()));
        }
        if !self.team.trim().is_empty() {
            parts.push(format!("For the team (turn {}): {}", self.turn, self.team.trim()));
        }
        if let Some(reward) = self.rewards.get(agent_id) {
            let explanation = self.explanations.get(agent_id).map(String::as_str).unwrap_or_default();
            parts.push(format!("Your reward (turn {}): {:.2}. {}", self.turn, reward, explanation));
        }
        if parts.is_empty() { None } else { Some(parts.join("\n")) }
    }
}

/// Scores a run with a judge model
#[derive(Debug, Clone)]
pub struct Evaluator {
    judge: ModelBinding,
    rubric: Rubric,
    kind: EnvironmentKind,
    task: String,
    agents: Vec<String>,
    policy: RetryPolicy,
    max_tokens: u32,
    timeout: Duration,
}

impl Evaluator {
    pub fn new(config: &TaskConfig, roster: &[RosterEntry], default_model: &str) -> Result<Self> {
        let kind = config.environment_kind()?;
        Ok(Self {
            judge: config.judge_binding(default_model)?,
            rubric: Rubric::for_kind(kind, &config.metrics.enabled_criteria()),
            kind,
            task: config.instructions(),
            agents: roster.iter().map(|r| r.id.clone()).collect(),
            policy: policy_for(&config.engine),
            max_tokens: config.engine.max_tokens,
            timeout: Duration::from_secs(120),
        })
    }

    /// Set the per-call judge timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn judge(&self) -> &ModelBinding {
        &self.judge
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    /// Score a finished run. Per-turn feedback scores feed the planning and
    /// communication series.
    pub async fn score(
        &self,
        transcript: &Transcript,
        environment: &Environment,
        feedback: &[TurnFeedback],
        registry: &ProviderRegistry,
        renderer: &PromptRenderer,
    ) -> (Metrics, Usage) {
        let prompt = match renderer.render_named(
            templates::JUDGE,
            &json!({
                "environment": self.kind.as_str(),
                "task": self.task,
                "agents": self.agents,
                "transcript": transcript.iter().map(Action::render).collect::<Vec<_>>(),
                "final_state": pretty(environment),
                "criteria": self.rubric.criteria,
                "guidance": self.rubric.guidance,
            }),
        ) {
            Ok(prompt) => prompt,
            Err(e) => return (Metrics::unscored(e.to_string()), Usage::default()),
        };

        let (reply, usage) = match self.call(prompt, registry).await {
            Ok(ok) => ok,
            Err(reason) => {
                log::warn!("Run left unscored: {}", reason);
                return (Metrics::unscored(reason), Usage::default());
            }
        };

        let metrics = match Verdict::parse(&reply, &self.rubric.criteria) {
            Ok(verdict) => {
                let planning = feedback.iter().filter_map(|f| f.planning).collect();
                let communication = feedback.iter().filter_map(|f| f.communication).collect();
                Metrics::Scored(Scorecard::from_verdict(
                    &self.judge.to_string(),
                    verdict,
                    &self.agents,
                    planning,
                    communication,
                ))
            }
            Err(reason) => {
                log::warn!("Judge verdict rejected: {}", reason);
                Metrics::unscored(reason)
            }
        };
        (metrics, usage)
    }

    /// Per-turn commentary for feedback mode
    pub async fn turn_feedback(
        &self,
        turn: u32,
        transcript: &Transcript,
        environment: &Environment,
        registry: &ProviderRegistry,
        renderer: &PromptRenderer,
    ) -> (TurnFeedback, Usage) {
        let prompt = match renderer.render_named(
            templates::FEEDBACK,
            &json!({
                "environment": self.kind.as_str(),
                "task": self.task,
                "turn": turn,
                "agents": self.agents,
                "actions": transcript.turn(turn).map(Action::render).collect::<Vec<_>>(),
                "final_state": pretty(environment),
            }),
        ) {
            Ok(prompt) => prompt,
            Err(e) => return (TurnFeedback::failed(turn, e.to_string()), Usage::default()),
        };

        let (reply, usage) = match self.call(prompt, registry).await {
            Ok(ok) => ok,
            Err(reason) => {
                log::warn!("No feedback for turn {}: {}", turn, reason);
                return (TurnFeedback::failed(turn, reason), Usage::default());
            }
        };

        let feedback = match FeedbackVerdict::parse(&reply) {
            Ok(verdict) => TurnFeedback::from_verdict(turn, verdict, &self.agents),
            Err(reason) => {
                log::warn!("Feedback for turn {} rejected: {}", turn, reason);
                TurnFeedback::failed(turn, reason)
            }
        };
        (feedback, usage)
    }

    async fn call(&self, prompt: String, registry: &ProviderRegistry) -> std::result::Result<(String, Usage), String> {
        let request = CompletionRequest::new(&self.judge.model, JUDGE_SYSTEM_PROMPT)
            .with_user_message(prompt)
            .with_max_tokens(self.max_tokens)
            .with_temperature(0.0);

        let response = tokio::time::timeout(self.timeout, registry.complete(&self.judge, request, &self.policy))
            .await
            .map_err(|_| format!("judge {} timed out after {:?}", self.judge, self.timeout))?
            .map_err(|e| format!("judge {} failed: {}", self.judge, e))?;

        Ok((response.content, response.usage))
    }
}

fn policy_for(options: &EngineOptions) -> RetryPolicy {
    RetryPolicy::new(options.model_retries, Duration::from_millis(options.retry_base_delay_ms))
}

fn pretty(environment: &Environment) -> String {
    serde_json::to_string_pretty(&environment.snapshot()).unwrap_or_default()
}
