//! Memory stores for agent context.
//!
//! `BaseMemory` keeps one append-only log per agent; `SharedMemory` keeps a
//! single run-scoped pool every agent recalls from. Recall order depends only
//! on the recorded sequence.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::transcript::Action;

/// Memory backend kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryKind {
    #[default]
    Base,
    Shared,
}

impl FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "base" | "basememory" => Ok(MemoryKind::Base),
            "shared" | "sharedmemory" => Ok(MemoryKind::Shared),
            _ => Err(format!("unknown memory type '{}'", s)),
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryKind::Base => write!(f, "BaseMemory"),
            MemoryKind::Shared => write!(f, "SharedMemory"),
        }
    }
}

/// One remembered item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub turn: u32,
    pub author: String,
    pub content: String,
}

impl MemoryEntry {
    pub fn new(turn: u32, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            turn,
            author: author.into(),
            content: content.into(),
        }
    }

    fn from_action(action: &Action) -> Self {
        Self::new(action.turn, &action.sender, action.payload.summary())
    }
}

/// Recall parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryQuery {
    /// Most recent N entries
    pub limit: usize,
    /// Only entries containing this text (case-insensitive)
    pub contains: Option<String>,
}

impl MemoryQuery {
    pub fn recent(limit: usize) -> Self {
        Self { limit, contains: None }
    }

    pub fn containing(mut self, text: impl Into<String>) -> Self {
        self.contains = Some(text.into().to_lowercase());
        self
    }

    fn select(&self, entries: &[MemoryEntry]) -> Vec<MemoryEntry> {
        let matching: Vec<&MemoryEntry> = entries
            .iter()
            .filter(|e| {
                self.contains
                    .as_deref()
                    .is_none_or(|needle| e.content.to_lowercase().contains(needle))
            })
            .collect();
        let skip = matching.len().saturating_sub(self.limit);
        matching.into_iter().skip(skip).cloned().collect()
    }
}

/// Storage behind agent context
pub trait MemoryStore: Send + Sync + fmt::Debug {
    fn kind(&self) -> MemoryKind;

    /// Append an entry to an agent's view
    fn record(&self, agent_id: &str, entry: MemoryEntry);

    /// Entries for an agent, oldest first
    fn recall(&self, agent_id: &str, query: &MemoryQuery) -> Vec<MemoryEntry>;

    /// Remember an action for its sender and every recipient
    fn record_action(&self, action: &Action) {
        let entry = MemoryEntry::from_action(action);
        self.record(&action.sender, entry.clone());
        for recipient in &action.recipients {
            self.record(recipient, entry.clone());
        }
    }
}

/// Per-agent private logs
#[derive(Debug, Default)]
pub struct BaseMemory {
    logs: RwLock<HashMap<String, Vec<MemoryEntry>>>,
}

impl BaseMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStore for BaseMemory {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Base
    }

    fn record(&self, agent_id: &str, entry: MemoryEntry) {
        if let Ok(mut logs) = self.logs.write() {
            logs.entry(agent_id.to_string()).or_default().push(entry);
        }
    }

    fn recall(&self, agent_id: &str, query: &MemoryQuery) -> Vec<MemoryEntry> {
        self.logs
            .read()
            .ok()
            .and_then(|logs| logs.get(agent_id).map(|log| query.select(log)))
            .unwrap_or_default()
    }
}

/// One pool shared by the whole run
#[derive(Debug, Default)]
pub struct SharedMemory {
    pool: RwLock<Vec<MemoryEntry>>,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStore for SharedMemory {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Shared
    }

    fn record(&self, _agent_id: &str, entry: MemoryEntry) {
        if let Ok(mut pool) = self.pool.write() {
            pool.push(entry);
        }
    }

    fn recall(&self, _agent_id: &str, query: &MemoryQuery) -> Vec<MemoryEntry> {
        self.pool.read().map(|pool| query.select(&pool)).unwrap_or_default()
    }

    /// Shared pool holds each action once
    fn record_action(&self, action: &Action) {
        self.record(&action.sender, MemoryEntry::from_action(action));
    }
}

/// Create the store a run asked for
pub fn create_memory(kind: MemoryKind) -> Arc<dyn MemoryStore> {
    match kind {
        MemoryKind::Base => Arc::new(BaseMemory::new()),
        MemoryKind::Shared => Arc::new(SharedMemory::new()),
    }
}
