//! ID generation utilities for Marble
//!
//! Provides functions for generating unique identifiers for runs and actions.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique run ID
///
/// Format: `run-{timestamp_ms}-{random_hex}`
/// Example: `run-1738300800123-a1b2`
pub fn generate_run_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("run-{}-{:04x}", timestamp, random)
}

/// Generate an action ID within a run
///
/// Format: `{run_suffix}-t{turn:03}-{seq:04}`
/// Example: For run "run-1738300800123-a1b2", turn 2, seq 5: "a1b2-t002-0005"
pub fn generate_action_id(run_id: &str, turn: u32, seq: usize) -> String {
    let run_suffix = run_id.rsplit('-').next().unwrap_or(run_id);
    format!("{}-t{:03}-{:04}", run_suffix, turn, seq)
}
