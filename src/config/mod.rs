//! Configuration for Marble.
//!
//! Two layers:
//! 1. Engine settings (marble.yml): provider endpoints, credential env vars, defaults
//! 2. Task configs: one file per benchmark run, immutable once the run starts

pub use self::settings::{LlmSettings, ProviderSettings, Settings};
pub use self::task::{
    AgentEntry, EngineOptions, EnvironmentDescriptor, FailurePolicy, JudgeModel, MemoryDescriptor,
    MetricsDescriptor, OutputDescriptor, PlannerDescriptor, RosterEntry, TaskConfig, TaskDescriptor,
};

mod settings;
mod task;
