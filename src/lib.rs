//! Marble - a multi-agent benchmark execution engine
//!
//! Marble reads a declarative task config, builds LLM-backed agents inside a
//! typed environment, runs them through a bounded-iteration interaction loop
//! and writes one scored JSONL record per run.

pub mod agent;
pub mod config;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod id;
pub mod llm;
pub mod memory;
pub mod output;
pub mod prompt;
pub mod report;
pub mod runner;
pub mod topology;
pub mod transcript;

pub use error::{MarbleError, Result};
