//! OpenAI-compatible chat completions client
//!
//! Serves every provider that speaks the `/chat/completions` wire format:
//! OpenAI, DeepSeek, OpenRouter, Together and local Ollama.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::llm::client::{LlmClient, LlmError};
use crate::llm::types::{CompletionRequest, CompletionResponse, StopReason, Usage};

/// Default max tokens
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Configuration for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub provider: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(provider: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// OpenAI-compatible API client
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    config: OpenAiConfig,
}

impl OpenAiClient {
    /// Create a client; `api_key` may be None for keyless local endpoints
    pub fn new(api_key: Option<String>, config: OpenAiConfig) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    /// Build the request body
    fn build_request(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system }));
        }
        for m in &request.messages {
            messages.push(json!({ "role": m.role.as_str(), "content": m.content }));
        }

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    /// Parse the API response into a CompletionResponse
    fn parse_response(&self, body: Value) -> Result<CompletionResponse, LlmError> {
        let choice = body["choices"]
            .get(0)
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        let content = choice["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("choice has no text content".to_string()))?
            .to_string();

        let usage = body
            .get("usage")
            .map(|u| {
                Usage::new(
                    u["prompt_tokens"].as_u64().unwrap_or(0),
                    u["completion_tokens"].as_u64().unwrap_or(0),
                )
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            stop_reason: StopReason::from_provider(choice["finish_reason"].as_str()),
            usage,
        })
    }

    async fn send_request(&self, body: Value) -> Result<Value, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.config.timeout)
            } else {
                LlmError::Network(e)
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(&request);
        let response = self.send_request(body).await?;
        self.parse_response(response)
    }

    fn provider(&self) -> &str {
        &self.config.provider
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("provider", &self.config.provider)
            .field("base_url", &self.config.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}
