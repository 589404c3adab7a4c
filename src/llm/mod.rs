//! LLM Client Layer - provider-neutral completion API
//!
//! This module provides:
//! - Message types for LLM communication
//! - LlmClient trait for API abstraction
//! - OpenAI-compatible and Anthropic implementations
//! - A scripted mock client
//! - Bounded retry with shared rate-limit backoff
//! - A provider registry that resolves model bindings to clients

pub mod anthropic;
pub mod binding;
pub mod client;
pub mod openai;
pub mod registry;
pub mod retry;
pub mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use binding::ModelBinding;
pub use client::{LlmClient, LlmError, MockLlmClient};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use registry::ProviderRegistry;
pub use retry::{RateLimitState, RetryPolicy, complete_with_retry};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, Usage, estimate_tokens};
