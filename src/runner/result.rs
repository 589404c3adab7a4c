//! RunResult: the immutable record of one completed run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::TaskConfig;
use crate::environment::{EnvironmentKind, TerminationReason};
use crate::error::Result;
use crate::evaluator::{Metrics, TurnFeedback};
use crate::llm::Usage;
use crate::memory::MemoryKind;
use crate::topology::CoordinateMode;
use crate::transcript::Transcript;

/// What kind of run this was
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSummary {
    pub kind: EnvironmentKind,
    pub name: String,
    pub max_iterations: u32,
    pub coordinate_mode: CoordinateMode,
    pub memory: MemoryKind,
}

/// Why and when the run stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Termination {
    pub reason: TerminationReason,
    pub turn: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Cause recorded when a run ends with reason failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    pub turn: u32,
    pub agent_id: Option<String>,
    pub message: String,
}

/// An agent turn treated as a no-op
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTurn {
    pub turn: u32,
    pub agent_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub task_id: Option<String>,
    pub scenario: Option<String>,
    pub environment: EnvironmentSummary,
    pub config: serde_json::Value,
    /// SHA-256 of the serialized config snapshot
    pub config_digest: String,
    pub termination: Termination,
    pub final_state: serde_json::Value,
    pub transcript: Transcript,
    pub metrics: Metrics,
    pub feedback: Vec<TurnFeedback>,
    pub failure: Option<FailureCause>,
    pub skipped: Vec<SkippedTurn>,
    /// Total tokens across agent and judge calls
    pub token_usage: u64,
    pub usage: Usage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunResult {
    /// Whether the run reached a valid terminal state (explicit or cap)
    pub fn succeeded(&self) -> bool {
        self.termination.reason != TerminationReason::Failure
    }

    /// One JSONL line (no trailing newline)
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Config snapshot and its digest
pub fn snapshot_config(config: &TaskConfig) -> Result<(serde_json::Value, String)> {
    let snapshot = serde_json::to_value(config)?;
    let bytes = serde_json::to_vec(&snapshot)?;
    let digest = hex::encode(Sha256::digest(&bytes));
    Ok((snapshot, digest))
}
