//! Error types for Marble
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::llm::LlmError;

/// All error types that can occur in Marble
#[derive(Debug, Error)]
pub enum MarbleError {
    /// Malformed or incomplete task configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM provider error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Agent failed to produce a usable action
    #[error("Agent {agent_id} failed: {message}")]
    Agent { agent_id: String, message: String },

    /// Action rejected by the environment, or an illegal lifecycle transition
    #[error("Environment error: {0}")]
    Environment(String),

    /// Judge call or verdict parsing failed
    #[error("Evaluator error: {0}")]
    Evaluator(String),

    /// Result sink could not be written
    #[error("Output error: {0}")]
    Output(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MarbleError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        MarbleError::Config(message.into())
    }

    /// Returns true if the error means the run can never start
    pub fn is_config(&self) -> bool {
        matches!(self, MarbleError::Config(_))
    }
}

/// Result type alias for Marble operations
pub type Result<T> = std::result::Result<T, MarbleError>;
