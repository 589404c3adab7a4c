//! Coordination topology: who may address whom.
//!
//! Static for a run. The addressing rule depends on `coordinate_mode`:
//!
//! - graph: relationship edges (both directions), fully connected without edges
//! - star: the first agent is the hub; spokes address only the hub
//! - chain: each agent addresses its roster neighbours
//! - tree: binary tree over the roster in order; parent and children

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Topology kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateMode {
    #[default]
    Graph,
    Star,
    Chain,
    Tree,
}

impl FromStr for CoordinateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "graph" => Ok(CoordinateMode::Graph),
            "star" => Ok(CoordinateMode::Star),
            "chain" => Ok(CoordinateMode::Chain),
            "tree" => Ok(CoordinateMode::Tree),
            _ => Err(format!("unknown coordinate_mode '{}'", s)),
        }
    }
}

impl fmt::Display for CoordinateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoordinateMode::Graph => "graph",
            CoordinateMode::Star => "star",
            CoordinateMode::Chain => "chain",
            CoordinateMode::Tree => "tree",
        };
        write!(f, "{}", s)
    }
}

/// Agent id -> permitted recipients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    mode: CoordinateMode,
    order: Vec<String>,
    permitted: BTreeMap<String, BTreeSet<String>>,
}

impl Topology {
    /// Build the topology for a roster (in config order)
    pub fn new(mode: CoordinateMode, agents: &[String], edges: &[(String, String)]) -> Self {
        let mut permitted: BTreeMap<String, BTreeSet<String>> =
            agents.iter().map(|a| (a.clone(), BTreeSet::new())).collect();

        let mut link = |a: &str, b: &str| {
            if a == b {
                return;
            }
            if let Some(set) = permitted.get_mut(a) {
                set.insert(b.to_string());
            }
            if let Some(set) = permitted.get_mut(b) {
                set.insert(a.to_string());
            }
        };

        match mode {
            CoordinateMode::Graph if !edges.is_empty() => {
                for (a, b) in edges {
                    link(a.as_str(), b.as_str());
                }
            }
            CoordinateMode::Graph => {
                for a in agents {
                    for b in agents {
                        link(a.as_str(), b.as_str());
                    }
                }
            }
            CoordinateMode::Star => {
                if let Some((hub, spokes)) = agents.split_first() {
                    for spoke in spokes {
                        link(hub.as_str(), spoke.as_str());
                    }
                }
            }
            CoordinateMode::Chain => {
                for pair in agents.windows(2) {
                    link(pair[0].as_str(), pair[1].as_str());
                }
            }
            CoordinateMode::Tree => {
                for (index, child) in agents.iter().enumerate().skip(1) {
                    link(agents[(index - 1) / 2].as_str(), child.as_str());
                }
            }
        }

        Self {
            mode,
            order: agents.to_vec(),
            permitted,
        }
    }

    pub fn mode(&self) -> CoordinateMode {
        self.mode
    }

    /// Recipients `sender` may address (empty for unknown senders)
    pub fn permitted(&self, sender: &str) -> BTreeSet<String> {
        self.permitted.get(sender).cloned().unwrap_or_default()
    }

    /// Agents that act this turn, in acting order.
    ///
    /// Every agent acts every turn; star puts the hub first, which is
    /// already the roster order.
    pub fn active_agents(&self, _turn: u32) -> Vec<String> {
        self.order.clone()
    }

    /// Chain coordination hands work down the line, so turns are sequential
    pub fn requires_sequential(&self) -> bool {
        self.mode == CoordinateMode::Chain
    }

    /// Requested recipients restricted to what the topology permits.
    /// An empty request means every permitted recipient.
    pub fn resolve_recipients(&self, sender: &str, requested: &[String]) -> BTreeSet<String> {
        let permitted = self.permitted(sender);
        if requested.is_empty() {
            return permitted;
        }
        let resolved: BTreeSet<String> = requested
            .iter()
            .filter(|r| permitted.contains(r.as_str()))
            .cloned()
            .collect();
        if resolved.len() < requested.len() {
            log::debug!(
                "Dropped recipients outside the {} topology for {}: requested {:?}",
                self.mode,
                sender,
                requested
            );
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_graph_without_edges_is_fully_connected() {
        let topology = Topology::new(CoordinateMode::Graph, &ids(&["a", "b", "c"]), &[]);
        assert_eq!(topology.permitted("a"), set(&["b", "c"]));
        assert_eq!(topology.permitted("c"), set(&["a", "b"]));
    }

    #[test]
    fn test_graph_with_edges() {
        let edges = vec![("a".to_string(), "b".to_string())];
        let topology = Topology::new(CoordinateMode::Graph, &ids(&["a", "b", "c"]), &edges);
        assert_eq!(topology.permitted("a"), set(&["b"]));
        assert_eq!(topology.permitted("b"), set(&["a"]));
        assert!(topology.permitted("c").is_empty());
    }

    #[test]
    fn test_star() {
        let topology = Topology::new(CoordinateMode::Star, &ids(&["hub", "s1", "s2"]), &[]);
        assert_eq!(topology.permitted("hub"), set(&["s1", "s2"]));
        assert_eq!(topology.permitted("s1"), set(&["hub"]));
        assert_eq!(topology.active_agents(1)[0], "hub");
    }

    #[test]
    fn test_chain_is_sequential() {
        let topology = Topology::new(CoordinateMode::Chain, &ids(&["a", "b", "c"]), &[]);
        assert_eq!(topology.permitted("a"), set(&["b"]));
        assert_eq!(topology.permitted("b"), set(&["a", "c"]));
        assert!(topology.requires_sequential());
    }

    #[test]
    fn test_tree() {
        let topology = Topology::new(CoordinateMode::Tree, &ids(&["r", "l", "rt", "ll"]), &[]);
        assert_eq!(topology.permitted("r"), set(&["l", "rt"]));
        assert_eq!(topology.permitted("l"), set(&["r", "ll"]));
        assert_eq!(topology.permitted("ll"), set(&["l"]));
    }

    #[test]
    fn test_resolved_recipients_are_a_subset_of_permitted() {
        let topology = Topology::new(CoordinateMode::Star, &ids(&["hub", "s1", "s2"]), &[]);
        let resolved = topology.resolve_recipients("s1", &ids(&["s2", "hub", "ghost"]));
        assert_eq!(resolved, set(&["hub"]));
        assert!(resolved.is_subset(&topology.permitted("s1")));

        let all = topology.resolve_recipients("hub", &[]);
        assert_eq!(all, set(&["s1", "s2"]));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("".parse::<CoordinateMode>().unwrap(), CoordinateMode::Graph);
        assert_eq!("Star".parse::<CoordinateMode>().unwrap(), CoordinateMode::Star);
        assert!("mesh".parse::<CoordinateMode>().is_err());
    }
}
