//! LLM types for provider communication
//!
//! This module defines the message types for LLM requests and responses.
//! They are provider-neutral; each client maps them onto its wire format.

use serde::{Deserialize, Serialize};

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request to the LLM for completion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model id as understood by the provider (no provider prefix)
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Create a new completion request with a system prompt
    pub fn new(model: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            ..Default::default()
        }
    }

    /// Add a message to the request
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Add a user message
    pub fn with_user_message(self, content: impl Into<String>) -> Self {
        self.with_message(Message::user(content))
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Concatenated text of the system prompt and all messages
    pub fn prompt_text(&self) -> String {
        let mut text = self.system.clone();
        for message in &self.messages {
            text.push('\n');
            text.push_str(&message.content);
        }
        text
    }
}

/// Response from the LLM
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl CompletionResponse {
    /// Create a plain text response with no usage data
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Reason why the LLM stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    /// Map a provider finish/stop reason string
    pub fn from_provider(reason: Option<&str>) -> Self {
        match reason {
            Some("length") | Some("max_tokens") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        }
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    /// Create new usage stats
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Calculate total tokens
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulate usage from another instance
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Rough token estimation (actual tokenization varies)
/// ~4 characters per token on average for English text
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn test_completion_request_builder() {
        let req = CompletionRequest::new("gpt-4o-mini", "You are a seller")
            .with_user_message("Make an offer")
            .with_max_tokens(512)
            .with_temperature(0.0);

        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.system, "You are a seller");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.max_tokens, Some(512));
        assert_eq!(req.temperature, Some(0.0));
    }

    #[test]
    fn test_prompt_text_includes_all_parts() {
        let req = CompletionRequest::new("m", "system part").with_user_message("user part");
        let text = req.prompt_text();
        assert!(text.contains("system part"));
        assert!(text.contains("user part"));
    }

    #[test]
    fn test_stop_reason_from_provider() {
        assert_eq!(StopReason::from_provider(Some("stop")), StopReason::EndTurn);
        assert_eq!(StopReason::from_provider(Some("length")), StopReason::MaxTokens);
        assert_eq!(StopReason::from_provider(Some("max_tokens")), StopReason::MaxTokens);
        assert_eq!(StopReason::from_provider(None), StopReason::EndTurn);
    }

    #[test]
    fn test_usage_add() {
        let mut usage = Usage::new(100, 50);
        usage.add(&Usage::new(200, 100));
        assert_eq!(usage.input_tokens, 300);
        assert_eq!(usage.output_tokens, 150);
        assert_eq!(usage.total(), 450);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("Hello, world!"), 4); // 13 chars, rounded up
    }
}
