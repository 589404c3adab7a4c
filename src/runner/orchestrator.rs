//! Orchestration loop: drives one run from config to RunResult.
//!
//! Each turn every active agent builds its context, asks its model for an
//! action and the action is validated, appended to the transcript, recorded in
//! memory and applied to the environment. Agents are dispatched concurrently
//! when neither the environment nor the topology needs ordering; application
//! is always serialized in roster order. The loop stops on explicit
//! termination, the iteration cap, the run timeout or an unrecoverable failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;

use super::result::{EnvironmentSummary, FailureCause, RunResult, SkippedTurn, Termination, snapshot_config};
use crate::agent::{Agent, TurnInputs};
use crate::config::{EngineOptions, FailurePolicy, TaskConfig};
use crate::environment::{Environment, Lifecycle, ParsedAction, TerminationReason};
use crate::error::{MarbleError, Result};
use crate::evaluator::{Evaluator, Metrics, TurnFeedback};
use crate::id::{generate_action_id, generate_run_id};
use crate::llm::{ProviderRegistry, Usage};
use crate::memory::{MemoryStore, create_memory};
use crate::prompt::PromptRenderer;
use crate::topology::Topology;
use crate::transcript::{Action, Transcript};

/// A validated reply waiting to be applied
#[derive(Debug)]
struct Draft {
    parsed: ParsedAction,
    raw: String,
}

/// Why an agent produced no action
#[derive(Debug)]
enum AgentFailure {
    /// Model call failed after retries
    Model(String),
    /// Every reply was rejected by the environment
    Invalid(String),
}

#[derive(Debug)]
struct TurnOutcome {
    agent: usize,
    usage: Usage,
    result: std::result::Result<Draft, AgentFailure>,
}

/// Mutable state of one run. Owned by the loop; nothing else writes to it.
struct RunState {
    run_id: String,
    environment: Environment,
    topology: Topology,
    memory: Arc<dyn MemoryStore>,
    agents: Vec<Agent>,
    transcript: Transcript,
    feedback: Vec<TurnFeedback>,
    latest_feedback: HashMap<String, String>,
    skipped: Vec<SkippedTurn>,
    failure: Option<FailureCause>,
    usage: Usage,
    detail: Option<String>,
}

/// Runs task configs against a provider registry
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    renderer: Arc<PromptRenderer>,
    default_model: String,
    force_feedback: bool,
}

impl Orchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, default_model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            registry,
            renderer: Arc::new(PromptRenderer::builtin()?),
            default_model: default_model.into(),
            force_feedback: false,
        })
    }

    /// Enable feedback mode for every run regardless of config
    pub fn with_feedback(mut self, enabled: bool) -> Self {
        self.force_feedback = enabled;
        self
    }

    /// Execute one run.
    ///
    /// Returns `Err` only for configuration errors; every other failure ends
    /// the run with reason failure and is recorded in the result.
    pub async fn run(&self, config: &TaskConfig) -> Result<RunResult> {
        config.validate(&self.default_model)?;

        let started_at = Utc::now();
        let started = Instant::now();
        let options = &config.engine;
        let feedback_mode = self.force_feedback || options.feedback_mode;

        let roster = config.roster(&self.default_model)?;
        let ids: Vec<String> = roster.iter().map(|r| r.id.clone()).collect();
        let topology = Topology::new(config.coordinate_mode()?, &ids, &config.edges(&roster)?);
        let memory = create_memory(config.memory_kind()?);
        let evaluator = Evaluator::new(config, &roster, &self.default_model)?;
        let (config_snapshot, config_digest) = snapshot_config(config)?;

        let mut state = RunState {
            run_id: generate_run_id(),
            environment: Environment::from_config(config)?,
            topology,
            agents: roster.into_iter().map(|r| Agent::new(r, memory.clone())).collect(),
            memory,
            transcript: Transcript::new(),
            feedback: Vec::new(),
            latest_feedback: HashMap::new(),
            skipped: Vec::new(),
            failure: None,
            usage: Usage::default(),
            detail: None,
        };

        let sequential = state.environment.kind().requires_sequential() || state.topology.requires_sequential();
        log::info!(
            "Starting run {} ({}): {} agents, {} topology, {} dispatch, max {} turns{}",
            state.run_id,
            config.label(),
            state.agents.len(),
            state.topology.mode(),
            if sequential { "sequential" } else { "concurrent" },
            state.environment.max_iterations(),
            if feedback_mode { ", feedback mode" } else { "" }
        );

        state.environment.start()?;
        let task = config.instructions();
        let initial_progress = config.engine_planner.initial_progress.as_deref();
        let timeout = options.run_timeout_secs.map(Duration::from_secs);

        loop {
            let turn = state.environment.turn();
            log::debug!("Run {} turn {}", state.run_id, turn);

            if sequential {
                self.sequential_turn(&mut state, &task, initial_progress, options).await;
            } else {
                self.concurrent_turn(&mut state, &task, initial_progress, options).await;
            }

            if state.failure.is_some() {
                state.environment.terminate(TerminationReason::Failure);
                break;
            }

            if feedback_mode {
                let (feedback, usage) = evaluator
                    .turn_feedback(turn, &state.transcript, &state.environment, &self.registry, &self.renderer)
                    .await;
                state.usage.add(&usage);
                state.latest_feedback = state
                    .agents
                    .iter()
                    .filter_map(|a| feedback.for_agent(a.id()).map(|text| (a.id().to_string(), text)))
                    .collect();
                state.feedback.push(feedback);
            }

            if state.environment.explicit_end() {
                state.environment.terminate(TerminationReason::Explicit);
                break;
            }
            if turn >= state.environment.max_iterations() {
                state.environment.terminate(TerminationReason::Cap);
                break;
            }
            if let Some(limit) = timeout
                && started.elapsed() >= limit
            {
                log::warn!("Run {} hit its {:?} timeout after turn {}", state.run_id, limit, turn);
                state.detail = Some(format!("run timeout of {}s reached", limit.as_secs()));
                state.environment.terminate(TerminationReason::Cap);
                break;
            }
            state.environment.advance()?;
        }

        let (reason, turn) = match state.environment.lifecycle() {
            Lifecycle::Terminated { reason, turn } => (reason, turn),
            other => return Err(MarbleError::InvalidState(format!("run loop ended in {:?}", other))),
        };

        let metrics = if reason == TerminationReason::Failure {
            Metrics::unscored("run terminated by failure")
        } else {
            let (metrics, usage) = evaluator
                .score(
                    &state.transcript,
                    &state.environment,
                    &state.feedback,
                    &self.registry,
                    &self.renderer,
                )
                .await;
            state.usage.add(&usage);
            metrics
        };

        let detail = state
            .detail
            .take()
            .or_else(|| state.failure.as_ref().map(|f| f.message.clone()));

        log::info!(
            "Run {} finished: {} at turn {} with {} actions",
            state.run_id,
            reason,
            turn,
            state.transcript.len()
        );

        Ok(RunResult {
            run_id: state.run_id,
            task_id: config.task_id.clone(),
            scenario: config.scenario.clone(),
            environment: EnvironmentSummary {
                kind: state.environment.kind(),
                name: state.environment.name().to_string(),
                max_iterations: state.environment.max_iterations(),
                coordinate_mode: state.topology.mode(),
                memory: state.memory.kind(),
            },
            config: config_snapshot,
            config_digest,
            termination: Termination { reason, turn, detail },
            final_state: state.environment.snapshot(),
            transcript: state.transcript,
            metrics,
            feedback: state.feedback,
            failure: state.failure,
            skipped: state.skipped,
            token_usage: state.usage.total(),
            usage: state.usage,
            started_at,
            finished_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// One agent after another; each sees the actions applied before it
    async fn sequential_turn(
        &self,
        state: &mut RunState,
        task: &str,
        initial_progress: Option<&str>,
        options: &EngineOptions,
    ) {
        let turn = state.environment.turn();
        for agent_id in state.topology.active_agents(turn) {
            if state.environment.explicit_end() {
                break;
            }
            let Some(index) = state.agents.iter().position(|a| a.id() == agent_id) else {
                continue;
            };
            let outcome = self.draft(state, index, task, initial_progress, options).await;
            self.settle(state, outcome, options);
            if state.failure.is_some() {
                break;
            }
        }
    }

    /// All agents against the turn-start state, applied in roster order
    async fn concurrent_turn(
        &self,
        state: &mut RunState,
        task: &str,
        initial_progress: Option<&str>,
        options: &EngineOptions,
    ) {
        let turn = state.environment.turn();
        let semaphore = Semaphore::new(options.max_concurrency.max(1));
        let indices: Vec<usize> = state
            .topology
            .active_agents(turn)
            .iter()
            .filter_map(|id| state.agents.iter().position(|a| a.id() == id.as_str()))
            .collect();

        let outcomes = {
            let shared: &RunState = state;
            let futures = indices.iter().map(|&index| {
                let semaphore = &semaphore;
                async move {
                    let _permit = semaphore.acquire().await.ok();
                    self.draft(shared, index, task, initial_progress, options).await
                }
            });
            join_all(futures).await
        };

        for outcome in outcomes {
            if state.failure.is_some() {
                // Not applied, but the model calls were still made
                state.usage.add(&outcome.usage);
                continue;
            }
            self.settle(state, outcome, options);
        }
    }

    /// Ask one agent for an action, retrying rejected replies with a hint
    async fn draft(
        &self,
        state: &RunState,
        index: usize,
        task: &str,
        initial_progress: Option<&str>,
        options: &EngineOptions,
    ) -> TurnOutcome {
        let agent = &state.agents[index];
        let inputs = TurnInputs {
            task,
            initial_progress,
            environment: &state.environment,
            transcript: &state.transcript,
            feedback: state.latest_feedback.get(agent.id()).map(String::as_str),
        };
        let permitted: Vec<String> = state.topology.permitted(agent.id()).into_iter().collect();
        let mut context = agent.build_context(&inputs, &permitted, options);
        let mut usage = Usage::default();
        let mut last_hint = String::new();

        for attempt in 0..=options.invalid_action_retries {
            let reply = match agent.act(&context, &self.registry, &self.renderer, options).await {
                Ok(reply) => reply,
                Err(e) => {
                    return TurnOutcome {
                        agent: index,
                        usage,
                        result: Err(AgentFailure::Model(e.to_string())),
                    };
                }
            };
            usage.add(&reply.usage);

            match state.environment.parse_action(agent.id(), &reply.text) {
                Ok(parsed) => {
                    return TurnOutcome {
                        agent: index,
                        usage,
                        result: Ok(Draft {
                            parsed,
                            raw: reply.text,
                        }),
                    };
                }
                Err(hint) => {
                    log::info!(
                        "{} sent an invalid action (attempt {}/{}): {}",
                        agent.id(),
                        attempt + 1,
                        options.invalid_action_retries + 1,
                        hint
                    );
                    context.hint = Some(hint.clone());
                    last_hint = hint;
                }
            }
        }

        TurnOutcome {
            agent: index,
            usage,
            result: Err(AgentFailure::Invalid(last_hint)),
        }
    }

    /// Apply one outcome to the run state
    fn settle(&self, state: &mut RunState, outcome: TurnOutcome, options: &EngineOptions) {
        state.usage.add(&outcome.usage);
        let turn = state.environment.turn();
        let agent_id = state.agents[outcome.agent].id().to_string();

        let draft = match outcome.result {
            Ok(draft) => draft,
            Err(AgentFailure::Model(message)) => {
                self.agent_failed(state, &agent_id, message, options.failure_policy);
                return;
            }
            Err(AgentFailure::Invalid(hint)) => {
                let message = format!("{} produced no valid action: {}", agent_id, hint);
                self.agent_failed(state, &agent_id, message, options.invalid_action_policy);
                return;
            }
        };

        if let Err(e) = state.environment.apply(&agent_id, &draft.parsed.payload) {
            let message = format!("{} action could not be applied: {}", agent_id, e);
            self.agent_failed(state, &agent_id, message, options.invalid_action_policy);
            return;
        }

        let agent = &mut state.agents[outcome.agent];
        let action = Action {
            id: generate_action_id(&state.run_id, turn, state.transcript.len() + 1),
            turn,
            sender: agent_id.clone(),
            role: agent.role().to_string(),
            recipients: state.topology.resolve_recipients(&agent_id, &draft.parsed.requested),
            payload: draft.parsed.payload,
            content: draft.raw,
            timestamp: Utc::now(),
        };
        log::debug!("{}", action.render());

        state.memory.record_action(&action);
        agent.remember(&action);
        state.transcript.push(action);
    }

    fn agent_failed(&self, state: &mut RunState, agent_id: &str, message: String, policy: FailurePolicy) {
        let turn = state.environment.turn();
        match policy {
            FailurePolicy::Fatal => {
                log::error!("Run {} failed on turn {}: {}", state.run_id, turn, message);
                state.failure = Some(FailureCause {
                    turn,
                    agent_id: Some(agent_id.to_string()),
                    message,
                });
            }
            FailurePolicy::Skip => {
                log::warn!("Skipping {} on turn {}: {}", agent_id, turn, message);
                state.skipped.push(SkippedTurn {
                    turn,
                    agent_id: agent_id.to_string(),
                    reason: message,
                });
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("default_model", &self.default_model)
            .field("force_feedback", &self.force_feedback)
            .finish()
    }
}
