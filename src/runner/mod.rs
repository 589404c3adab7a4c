//! Run execution - the orchestration loop and the record it produces.
//!
//! This module provides:
//! - Orchestrator for executing one task config end to end
//! - RunResult and its parts, written once per run

mod orchestrator;
mod result;

pub use orchestrator::Orchestrator;
pub use result::{EnvironmentSummary, FailureCause, RunResult, SkippedTurn, Termination, snapshot_config};
