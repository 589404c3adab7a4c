//! Core LLM client trait, error type and a scripted mock client

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::types::{CompletionRequest, CompletionResponse, Usage};

/// Stateless LLM client - each call is independent (fresh context)
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single completion request (blocking until complete)
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Provider name this client serves
    fn provider(&self) -> &str;
}

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500 || *status == 408,
            LlmError::Network(_) => true,
            LlmError::Timeout(_) => true,
            LlmError::InvalidResponse(_) => true,
            LlmError::JsonError(_) => false,
            LlmError::MissingApiKey { .. } => false,
            LlmError::UnknownProvider(_) => false,
        }
    }
}

/// A scripted reply for [`MockLlmClient`]
#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Fail { status: u16, message: String },
}

/// Mock client for tests and dry runs.
///
/// Replies are scripted per model id and consumed in order. A model can also
/// be marked as always failing, and a default reply covers exhausted scripts.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    provider: String,
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    failing: Mutex<HashMap<String, (u16, String)>>,
    default_reply: Option<String>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    /// Create a mock registered under the "mock" provider
    pub fn new() -> Self {
        Self::for_provider("mock")
    }

    /// Create a mock that serves the given provider name
    pub fn for_provider(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Default::default()
        }
    }

    /// Queue a text reply for a model
    pub fn with_reply(self, model: &str, text: impl Into<String>) -> Self {
        self.push(model, MockReply::Text(text.into()));
        self
    }

    /// Queue several text replies for a model
    pub fn with_replies<I, S>(self, model: &str, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for text in texts {
            self.push(model, MockReply::Text(text.into()));
        }
        self
    }

    /// Queue a single provider error for a model
    pub fn with_error(self, model: &str, status: u16, message: impl Into<String>) -> Self {
        self.push(
            model,
            MockReply::Fail {
                status,
                message: message.into(),
            },
        );
        self
    }

    /// Make every call for a model fail with a provider error
    pub fn always_failing(self, model: &str, status: u16, message: impl Into<String>) -> Self {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(model.to_string(), (status, message.into()));
        }
        self
    }

    /// Reply used once a model's script is exhausted
    pub fn with_default_reply(mut self, text: impl Into<String>) -> Self {
        self.default_reply = Some(text.into());
        self
    }

    /// All requests received so far
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Requests received for one model
    pub fn calls_for(&self, model: &str) -> Vec<CompletionRequest> {
        self.calls()
            .into_iter()
            .filter(|r| r.model == model)
            .collect()
    }

    fn push(&self, model: &str, reply: MockReply) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(model.to_string()).or_default().push_back(reply);
        }
    }

    fn next_reply(&self, model: &str) -> Option<MockReply> {
        if let Ok(failing) = self.failing.lock()
            && let Some((status, message)) = failing.get(model)
        {
            return Some(MockReply::Fail {
                status: *status,
                message: message.clone(),
            });
        }
        let scripted = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(model).and_then(|q| q.pop_front()));
        scripted.or_else(|| self.default_reply.clone().map(MockReply::Text))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.clone();
        let prompt_len = request.prompt_text().len() as u64;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request);
        }

        match self.next_reply(&model) {
            Some(MockReply::Text(text)) => Ok(CompletionResponse {
                usage: Usage::new(prompt_len / 4, text.len() as u64 / 4),
                content: text,
                ..Default::default()
            }),
            Some(MockReply::Fail { status, message }) => Err(LlmError::ApiError { status, message }),
            None => Err(LlmError::InvalidResponse(format!(
                "no scripted reply left for model {}",
                model
            ))),
        }
    }

    fn provider(&self) -> &str {
        &self.provider
    }
}
