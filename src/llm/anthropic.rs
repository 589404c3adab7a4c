//! Anthropic API client implementation
//!
//! This module implements the LlmClient trait for the Anthropic (Claude) API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::llm::client::{LlmClient, LlmError};
use crate::llm::types::{CompletionRequest, CompletionResponse, Role, StopReason, Usage};

/// Anthropic API base URL
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default max tokens
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Configuration for the Anthropic client
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: ANTHROPIC_API_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Anthropic API client
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    config: AnthropicConfig,
}

impl AnthropicClient {
    /// Create a client with an explicit API key
    pub fn with_api_key(api_key: String, config: AnthropicConfig) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    /// Build the request body for the Anthropic API
    fn build_request(&self, request: &CompletionRequest) -> Value {
        // Anthropic takes the system prompt out of band; stray system
        // messages are folded into it.
        let mut system = request.system.clone();
        let mut messages = Vec::new();
        for m in &request.messages {
            match m.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push_str("\n\n");
                    }
                    system.push_str(&m.content);
                }
                Role::User | Role::Assistant => {
                    messages.push(json!({ "role": m.role.as_str(), "content": m.content }));
                }
            }
        }

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages
        });

        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        body
    }

    /// Parse the API response into a CompletionResponse
    fn parse_response(&self, body: Value) -> Result<CompletionResponse, LlmError> {
        let usage = body
            .get("usage")
            .map(|u| {
                Usage::new(
                    u["input_tokens"].as_u64().unwrap_or(0),
                    u["output_tokens"].as_u64().unwrap_or(0),
                )
            })
            .unwrap_or_default();

        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| LlmError::InvalidResponse("response has no content".to_string()))?;

        let mut content = String::new();
        for block in blocks {
            if block["type"].as_str() == Some("text")
                && let Some(text) = block["text"].as_str()
            {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(text);
            }
        }

        Ok(CompletionResponse {
            content,
            stop_reason: StopReason::from_provider(body["stop_reason"].as_str()),
            usage,
        })
    }

    /// Send a request to the Anthropic API
    async fn send_request(&self, body: Value) -> Result<Value, LlmError> {
        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
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
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(&request);
        let response = self.send_request(body).await?;
        self.parse_response(response)
    }

    fn provider(&self) -> &str {
        "anthropic"
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.config.base_url)
            .field("max_tokens", &self.config.max_tokens)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Message;

    fn client() -> AnthropicClient {
        AnthropicClient::with_api_key("test-key".to_string(), AnthropicConfig::default()).unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = AnthropicConfig::default();
        assert_eq!(config.base_url, ANTHROPIC_API_URL);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_build_request_basic() {
        let request = CompletionRequest::new("claude-sonnet-4-20250514", "You are helpful")
            .with_user_message("Hello");

        let body = client().build_request(&request);

        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["system"], "You are helpful");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Hello");
    }

    #[test]
    fn test_build_request_folds_system_messages() {
        let request = CompletionRequest::new("m", "base")
            .with_message(Message {
                role: Role::System,
                content: "extra rules".to_string(),
            })
            .with_user_message("go");

        let body = client().build_request(&request);
        assert_eq!(body["system"], "base\n\nextra rules");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_response_text_only() {
        let response = client()
            .parse_response(json!({
                "content": [
                    { "type": "text", "text": "Hello there!" }
                ],
                "stop_reason": "end_turn",
                "usage": { "input_tokens": 10, "output_tokens": 5 }
            }))
            .unwrap();

        assert_eq!(response.content, "Hello there!");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 10);
        assert_eq!(response.usage.output_tokens, 5);
    }

    #[test]
    fn test_parse_response_stop_reasons() {
        let test_cases = vec![
            ("end_turn", StopReason::EndTurn),
            ("max_tokens", StopReason::MaxTokens),
            ("stop_sequence", StopReason::StopSequence),
            ("unknown", StopReason::EndTurn),
        ];

        for (reason_str, expected) in test_cases {
            let response = client()
                .parse_response(json!({
                    "content": [],
                    "stop_reason": reason_str,
                    "usage": { "input_tokens": 0, "output_tokens": 0 }
                }))
                .unwrap();
            assert_eq!(response.stop_reason, expected);
        }
    }

    #[test]
    fn test_debug_impl() {
        let debug_str = format!("{:?}", client());
        assert!(debug_str.contains("AnthropicClient"));
        // Should NOT contain the API key
        assert!(!debug_str.contains("test-key"));
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AnthropicClient>();
    }
}
