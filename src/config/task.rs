//! Task configuration: the declarative description of one benchmark run.
//!
//! Accepts YAML or JSON (YAML is a superset). The converter that produces
//! these files leaves unset fields as empty strings and may write numbers as
//! strings, so string and number fields are parsed leniently.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::environment::EnvironmentKind;
use crate::error::{MarbleError, Result};
use crate::llm::ModelBinding;
use crate::memory::MemoryKind;
use crate::topology::CoordinateMode;

/// Parsed task configuration. Immutable once a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default, deserialize_with = "lenient_string")]
    pub scenario: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub task_id: Option<String>,

    pub environment: EnvironmentDescriptor,

    #[serde(default, deserialize_with = "lenient_string")]
    pub coordinate_mode: Option<String>,

    #[serde(default)]
    pub agents: Vec<AgentEntry>,

    /// Default model for agents that do not name one
    #[serde(default, deserialize_with = "lenient_string")]
    pub llm: Option<String>,

    #[serde(default)]
    pub memory: MemoryDescriptor,

    #[serde(default)]
    pub metrics: MetricsDescriptor,

    #[serde(default)]
    pub output: OutputDescriptor,

    /// `[from, to, label]` edges used by the graph topology
    #[serde(default)]
    pub relationships: Vec<Vec<String>>,

    #[serde(default)]
    pub task: TaskDescriptor,

    #[serde(default)]
    pub engine_planner: PlannerDescriptor,

    #[serde(default)]
    pub engine: EngineOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentDescriptor {
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub kind: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "lenient_u32")]
    pub max_iterations: Option<u32>,

    /// Inclusive `[min, max]` for bargaining offers
    #[serde(default)]
    pub offer_range: Option<[f64; 2]>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub agent_id: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub role: Option<String>,

    #[serde(default)]
    pub profile: String,

    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub agent_type: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub llm: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDescriptor {
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub kind: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub scope: Option<String>,
}

/// Judge model, given either as a bare string or as `{model: ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JudgeModel {
    Name(String),
    Spec { model: String },
}

impl JudgeModel {
    fn model(&self) -> &str {
        match self {
            JudgeModel::Name(name) => name,
            JudgeModel::Spec { model } => model,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsDescriptor {
    #[serde(default)]
    pub evaluate_llm: Option<JudgeModel>,

    /// Remaining keys; `true` flags name rubric criteria
    #[serde(flatten)]
    pub criteria: BTreeMap<String, serde_json::Value>,
}

impl MetricsDescriptor {
    /// Names of the enabled rubric criteria, in key order
    pub fn enabled_criteria(&self) -> Vec<String> {
        self.criteria
            .iter()
            .filter(|(_, v)| v.as_bool() == Some(true))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputDescriptor {
    #[serde(default, deserialize_with = "lenient_string")]
    pub file_path: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub format: Option<String>,

    /// Write to `<stem>-<run_id>.jsonl` instead of the shared file
    #[serde(default)]
    pub per_run_file: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDescriptor {
    #[serde(default)]
    pub content: String,

    #[serde(default, deserialize_with = "lenient_string")]
    pub output_format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerDescriptor {
    #[serde(default, deserialize_with = "lenient_string")]
    pub initial_progress: Option<String>,
}

/// What to do when an agent cannot produce a usable action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Terminate the run with reason failure
    Fatal,
    /// Treat the agent's turn as a no-op and continue
    Skip,
}

/// Engine policy knobs; every field has a default
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub failure_policy: FailurePolicy,
    pub invalid_action_policy: FailurePolicy,
    pub max_concurrency: usize,
    pub model_retries: u32,
    pub retry_base_delay_ms: u64,
    pub invalid_action_retries: u32,
    pub feedback_mode: bool,
    pub run_timeout_secs: Option<u64>,
    pub context_token_limit: usize,
    pub max_tokens: u32,
    pub memory_recall_limit: usize,
    pub temperature: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Fatal,
            invalid_action_policy: FailurePolicy::Skip,
            max_concurrency: 4,
            model_retries: 5,
            retry_base_delay_ms: 1000,
            invalid_action_retries: 2,
            feedback_mode: false,
            run_timeout_secs: None,
            context_token_limit: 32_000,
            max_tokens: 1024,
            memory_recall_limit: 10,
            temperature: 0.0,
        }
    }
}

/// One agent after validation: unique id and a resolved model binding
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub id: String,
    pub role: String,
    pub profile: String,
    pub binding: ModelBinding,
}

impl TaskConfig {
    /// Load a task configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| MarbleError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_str(&content)
            .map_err(|e| MarbleError::config(format!("{}: {}", path.display(), e)))
    }

    /// Parse a task configuration from YAML or JSON text
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| MarbleError::config(e.to_string()))
    }

    /// Check everything a run needs before it starts
    pub fn validate(&self, default_model: &str) -> Result<()> {
        self.environment_kind()?;
        self.max_iterations()?;
        self.coordinate_mode()?;
        self.memory_kind()?;
        let roster = self.roster(default_model)?;
        self.edges(&roster)?;
        self.offer_range()?;
        self.judge_binding(default_model)?;

        if let Some(format) = &self.output.format
            && !format.eq_ignore_ascii_case("jsonl")
        {
            return Err(MarbleError::config(format!(
                "unsupported output format '{}', only jsonl is supported",
                format
            )));
        }
        if self.engine.max_concurrency == 0 {
            return Err(MarbleError::config("engine.max_concurrency must be > 0"));
        }

        let kind = self.environment_kind()?;
        if roster.len() < kind.min_agents() {
            return Err(MarbleError::config(format!(
                "{} needs at least {} agents, got {}",
                kind,
                kind.min_agents(),
                roster.len()
            )));
        }
        Ok(())
    }

    pub fn environment_kind(&self) -> Result<EnvironmentKind> {
        let raw = self
            .environment
            .kind
            .as_deref()
            .ok_or_else(|| MarbleError::config("environment.type is required"))?;
        raw.parse().map_err(MarbleError::Config)
    }

    pub fn max_iterations(&self) -> Result<u32> {
        match self.environment.max_iterations {
            Some(n) if n > 0 => Ok(n),
            Some(_) => Err(MarbleError::config("environment.max_iterations must be > 0")),
            None => Err(MarbleError::config("environment.max_iterations is required")),
        }
    }

    pub fn coordinate_mode(&self) -> Result<CoordinateMode> {
        match self.coordinate_mode.as_deref() {
            None => Ok(CoordinateMode::default()),
            Some(raw) => raw.parse().map_err(MarbleError::Config),
        }
    }

    pub fn memory_kind(&self) -> Result<MemoryKind> {
        match self.memory.kind.as_deref() {
            None => Ok(MemoryKind::default()),
            Some(raw) => raw.parse().map_err(MarbleError::Config),
        }
    }

    /// Inclusive offer bounds for bargaining (default 0..=100)
    pub fn offer_range(&self) -> Result<(f64, f64)> {
        match self.environment.offer_range {
            None => Ok((0.0, 100.0)),
            Some([lo, hi]) if lo.is_finite() && hi.is_finite() && lo < hi => Ok((lo, hi)),
            Some([lo, hi]) => Err(MarbleError::config(format!(
                "environment.offer_range [{}, {}] is not a valid range",
                lo, hi
            ))),
        }
    }

    /// Validated agent roster in config order
    pub fn roster(&self, default_model: &str) -> Result<Vec<RosterEntry>> {
        if self.agents.is_empty() {
            return Err(MarbleError::config("agents list is empty"));
        }

        let fallback = self.llm.as_deref().unwrap_or(default_model);
        let mut seen = HashSet::new();
        let mut roster = Vec::with_capacity(self.agents.len());

        for (index, entry) in self.agents.iter().enumerate() {
            let id = entry
                .agent_id
                .clone()
                .or_else(|| entry.role.as_ref().map(|r| format!("{}{}", r.to_lowercase(), index + 1)))
                .unwrap_or_else(|| format!("agent{}", index + 1));
            if !seen.insert(id.clone()) {
                return Err(MarbleError::config(format!("duplicate agent id '{}'", id)));
            }

            let model = entry.llm.as_deref().unwrap_or(fallback);
            let binding = ModelBinding::parse(model)
                .ok_or_else(|| MarbleError::config(format!("agent '{}' has no model binding", id)))?;

            roster.push(RosterEntry {
                role: entry.role.clone().unwrap_or_else(|| id.clone()),
                profile: entry.profile.clone(),
                id,
                binding,
            });
        }
        Ok(roster)
    }

    /// Relationship edges, checked against the roster
    pub fn edges(&self, roster: &[RosterEntry]) -> Result<Vec<(String, String)>> {
        let ids: HashSet<&str> = roster.iter().map(|r| r.id.as_str()).collect();
        let mut edges = Vec::with_capacity(self.relationships.len());
        for rel in &self.relationships {
            if rel.len() < 2 {
                return Err(MarbleError::config(format!(
                    "relationship {:?} needs at least two agent ids",
                    rel
                )));
            }
            for id in &rel[..2] {
                if !ids.contains(id.as_str()) {
                    return Err(MarbleError::config(format!(
                        "relationship references unknown agent '{}'",
                        id
                    )));
                }
            }
            edges.push((rel[0].clone(), rel[1].clone()));
        }
        Ok(edges)
    }

    /// Judge model: metrics.evaluate_llm, then the task default, then settings
    pub fn judge_binding(&self, default_model: &str) -> Result<ModelBinding> {
        let model = self
            .metrics
            .evaluate_llm
            .as_ref()
            .map(JudgeModel::model)
            .filter(|m| !m.trim().is_empty())
            .or(self.llm.as_deref())
            .unwrap_or(default_model);
        ModelBinding::parse(model).ok_or_else(|| MarbleError::config("judge model binding is empty"))
    }

    /// Task instructions shown to every agent
    pub fn instructions(&self) -> String {
        let mut text = self.task.content.trim().to_string();
        if let Some(format) = &self.task.output_format {
            text.push_str("\n\n");
            text.push_str(format.trim());
        }
        text
    }

    /// Label for logs and reports
    pub fn label(&self) -> String {
        let scenario = self
            .scenario
            .clone()
            .or_else(|| self.environment.name.clone())
            .unwrap_or_else(|| "task".to_string());
        match &self.task_id {
            Some(id) => format!("{}#{}", scenario, id),
            None => scenario,
        }
    }
}

/// Accept strings, numbers and booleans; treat empty strings and null as None
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a string, got {}",
                other
            )));
        }
    })
}

/// Accept integers or numeric strings; treat empty strings and null as None
fn lenient_u32<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match lenient_string(deserializer)? {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected a positive integer, got '{}'", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BARGAINING: &str = r#"
scenario: bargaining
task_id: 7
coordinate_mode: graph
environment:
  type: Bargaining
  name: Bargaining Env
  max_iterations: 5
agents:
  - agent_id: seller
    role: Seller
    profile: You sell a used bike.
    llm: mock/seller
  - agent_id: buyer
    role: Buyer
    profile: You want a cheap bike.
    llm: mock/buyer
memory:
  type: BaseMemory
metrics:
  evaluate_llm: mock/judge
  content_accuracy: true
  practical_operability: false
output:
  file_path: result/bargaining.jsonl
relationships:
  - [seller, buyer, negotiate with]
task:
  content: Agree on a price.
  output_format: Reply with JSON.
"#;

    #[test]
    fn test_parse_full_config() {
        let config = TaskConfig::from_str(BARGAINING).unwrap();
        config.validate("openai/gpt-4o-mini").unwrap();

        assert_eq!(config.task_id.as_deref(), Some("7"));
        assert_eq!(config.environment_kind().unwrap(), EnvironmentKind::Bargaining);
        assert_eq!(config.max_iterations().unwrap(), 5);
        assert_eq!(config.coordinate_mode().unwrap(), CoordinateMode::Graph);
        assert_eq!(config.memory_kind().unwrap(), MemoryKind::Base);
        assert_eq!(config.metrics.enabled_criteria(), vec!["content_accuracy".to_string()]);
        assert_eq!(config.judge_binding("x").unwrap(), ModelBinding::new("mock", "judge"));
        assert_eq!(config.label(), "bargaining#7");
        assert!(config.instructions().ends_with("Reply with JSON."));
    }

    #[test]
    fn test_converter_output_is_accepted() {
        // Shape written by the flat-record converter: JSON, numeric strings,
        // empty strings for unset fields, evaluate_llm as a map.
        let json = r#"{"scenario":"training","task_id":3,"agents":[
            {"agent_id":"agent1","profile":"p1","type":"BaseAgent"},
            {"agent_id":"agent2","profile":"p2","type":"BaseAgent"}],
            "coordinate_mode":"","engine_planner":{"initial_progress":"Start."},
            "environment":{"max_iterations":"3","name":"Research","type":"Research"},
            "llm":"deepseek/deepseek-chat","memory":{"type":""},
            "metrics":{"content_accuracy":true,"evaluate_llm":{"model":"deepseek/deepseek-chat"}},
            "output":{"file_path":"out.jsonl","format":"jsonl"},
            "relationships":[["agent1","agent2","collaborate with"]],
            "task":{"content":"Do research.","output_format":""}}"#;

        let config = TaskConfig::from_str(json).unwrap();
        config.validate("openai/gpt-4o-mini").unwrap();

        assert_eq!(config.max_iterations().unwrap(), 3);
        assert_eq!(config.coordinate_mode().unwrap(), CoordinateMode::Graph);
        assert_eq!(config.memory_kind().unwrap(), MemoryKind::Base);
        assert!(config.task.output_format.is_none());
        let roster = config.roster("openai/gpt-4o-mini").unwrap();
        assert_eq!(roster[0].binding, ModelBinding::new("deepseek", "deepseek-chat"));
        assert_eq!(roster[1].role, "agent2");
        assert_eq!(config.engine_planner.initial_progress.as_deref(), Some("Start."));
    }

    #[test]
    fn test_empty_roster_is_rejected() {
        let config = TaskConfig::from_str("environment: {type: Coding, max_iterations: 2}").unwrap();
        let err = config.validate("m").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("agents list is empty"));
    }

    #[test]
    fn test_unknown_environment_is_rejected() {
        let config = TaskConfig::from_str(
            "environment: {type: Chess, max_iterations: 2}\nagents: [{agent_id: a}]",
        )
        .unwrap();
        assert!(config.validate("m").unwrap_err().is_config());
    }

    #[test]
    fn test_missing_max_iterations_is_rejected() {
        let config =
            TaskConfig::from_str("environment: {type: Coding, max_iterations: ''}\nagents: [{agent_id: a}]").unwrap();
        let err = config.validate("m").unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn test_non_numeric_max_iterations_fails_to_parse() {
        let result = TaskConfig::from_str("environment: {type: Coding, max_iterations: lots}");
        assert!(result.unwrap_err().is_config());
    }

    #[test]
    fn test_duplicate_agent_ids_are_rejected() {
        let config = TaskConfig::from_str(
            "environment: {type: Research, max_iterations: 2}\nagents: [{agent_id: a}, {agent_id: a}]",
        )
        .unwrap();
        assert!(config.validate("m").unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_relationship_to_unknown_agent_is_rejected() {
        let config = TaskConfig::from_str(
            "environment: {type: Research, max_iterations: 2}\nagents: [{agent_id: a}]\nrelationships: [[a, ghost, x]]",
        )
        .unwrap();
        assert!(config.validate("m").unwrap_err().to_string().contains("ghost"));
    }

    #[test]
    fn test_bargaining_needs_two_agents() {
        let config =
            TaskConfig::from_str("environment: {type: Bargaining, max_iterations: 2}\nagents: [{agent_id: a}]").unwrap();
        assert!(config.validate("m").unwrap_err().to_string().contains("at least 2"));
    }

    #[test]
    fn test_unsupported_output_format() {
        let config = TaskConfig::from_str(
            "environment: {type: Coding, max_iterations: 2}\nagents: [{agent_id: a}]\noutput: {file_path: x, format: csv}",
        )
        .unwrap();
        assert!(config.validate("m").unwrap_err().to_string().contains("csv"));
    }

    #[test]
    fn test_roster_generates_ids_from_roles() {
        let config = TaskConfig::from_str(
            "environment: {type: Bargaining, max_iterations: 2}\nagents: [{role: Seller}, {role: Buyer}]",
        )
        .unwrap();
        let roster = config.roster("openai/gpt-4o-mini").unwrap();
        assert_eq!(roster[0].id, "seller1");
        assert_eq!(roster[1].id, "buyer2");
        assert_eq!(roster[0].binding.provider, "openai");
    }

    #[test]
    fn test_engine_defaults_and_overrides() {
        let config = TaskConfig::from_str(
            "environment: {type: Coding, max_iterations: 2}\nagents: [{agent_id: a}]\nengine: {failure_policy: skip, feedback_mode: true}",
        )
        .unwrap();
        assert_eq!(config.engine.failure_policy, FailurePolicy::Skip);
        assert!(config.engine.feedback_mode);
        assert_eq!(config.engine.max_concurrency, 4);
        assert_eq!(config.engine.invalid_action_policy, FailurePolicy::Skip);
    }

    #[test]
    fn test_bad_offer_range() {
        let config = TaskConfig::from_str(
            "environment: {type: Bargaining, max_iterations: 2, offer_range: [10, 5]}\nagents: [{agent_id: a}, {agent_id: b}]",
        )
        .unwrap();
        assert!(config.validate("m").unwrap_err().to_string().contains("offer_range"));
    }
}
