//! Agents: role-bound wrappers around a model binding.
//!
//! An agent builds its context from memory, the part of the transcript it
//! can see and the latest evaluator feedback, then asks its model for a reply.
//! Model errors are retried with bounded backoff before surfacing as an
//! agent failure.

mod context;

use std::sync::Arc;
use std::time::Duration;

pub use context::{AgentContext, RenderedPrompt};

use crate::config::{EngineOptions, RosterEntry};
use crate::environment::Environment;
use crate::error::{MarbleError, Result};
use crate::llm::{CompletionRequest, ModelBinding, ProviderRegistry, RetryPolicy, Usage};
use crate::memory::{MemoryQuery, MemoryStore};
use crate::prompt::PromptRenderer;
use crate::transcript::{Action, Transcript};

/// A model reply for one agent turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
    pub usage: Usage,
}

/// Per-turn inputs shared by every agent
#[derive(Debug, Clone, Copy)]
pub struct TurnInputs<'a> {
    pub task: &'a str,
    pub initial_progress: Option<&'a str>,
    pub environment: &'a Environment,
    pub transcript: &'a Transcript,
    pub feedback: Option<&'a str>,
}

/// An LLM-backed participant of one run
#[derive(Debug)]
pub struct Agent {
    entry: RosterEntry,
    memory: Arc<dyn MemoryStore>,
    last_action: Option<Action>,
}

impl Agent {
    pub fn new(entry: RosterEntry, memory: Arc<dyn MemoryStore>) -> Self {
        Self {
            entry,
            memory,
            last_action: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.entry.id
    }

    pub fn role(&self) -> &str {
        &self.entry.role
    }

    pub fn profile(&self) -> &str {
        &self.entry.profile
    }

    pub fn binding(&self) -> &ModelBinding {
        &self.entry.binding
    }

    /// Most recent action this agent emitted
    pub fn last_action(&self) -> Option<&Action> {
        self.last_action.as_ref()
    }

    pub fn remember(&mut self, action: &Action) {
        self.last_action = Some(action.clone());
    }

    /// Assemble the context for this agent's next turn
    pub fn build_context(
        &self,
        inputs: &TurnInputs<'_>,
        recipients: &[String],
        options: &EngineOptions,
    ) -> AgentContext {
        let memory = self
            .memory
            .recall(self.id(), &MemoryQuery::recent(options.memory_recall_limit))
            .into_iter()
            .map(|e| format!("[turn {}] {}: {}", e.turn, e.author, e.content))
            .collect();

        let history = inputs
            .transcript
            .visible_to(self.id())
            .map(Action::render)
            .collect();

        AgentContext {
            agent_id: self.entry.id.clone(),
            role: self.entry.role.clone(),
            profile: self.entry.profile.clone(),
            task: inputs.task.to_string(),
            initial_progress: inputs.initial_progress.map(str::to_string),
            instructions: inputs.environment.instructions(&self.entry),
            turn: inputs.environment.turn(),
            max_iterations: inputs.environment.max_iterations(),
            recipients: recipients.join(", "),
            state: inputs.environment.snapshot(),
            memory,
            history,
            feedback: inputs.feedback.map(str::to_string),
            hint: None,
        }
    }

    /// Ask the model for this agent's reply
    pub async fn act(
        &self,
        context: &AgentContext,
        registry: &ProviderRegistry,
        renderer: &PromptRenderer,
        options: &EngineOptions,
    ) -> Result<AgentReply> {
        let mut context = context.clone();
        context.truncate_to(renderer, options.context_token_limit)?;
        let prompt = context.render(renderer)?;

        let request = CompletionRequest::new(&self.entry.binding.model, prompt.system)
            .with_user_message(prompt.user)
            .with_max_tokens(options.max_tokens)
            .with_temperature(options.temperature);
        let policy = RetryPolicy::new(
            options.model_retries,
            Duration::from_millis(options.retry_base_delay_ms),
        );

        log::debug!(
            "{} calling {} (turn {})",
            self.id(),
            self.entry.binding,
            context.turn
        );

        let response = registry
            .complete(&self.entry.binding, request, &policy)
            .await
            .map_err(|e| MarbleError::Agent {
                agent_id: self.id().to_string(),
                message: e.to_string(),
            })?;

        Ok(AgentReply {
            text: response.content,
            usage: response.usage,
        })
    }
}
