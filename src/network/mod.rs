//! Network Graph - undirected travel-time graph between depot and entities
//!
//! Built from upstream edge lists, weights stored in seconds. Shortest
//! travel times come from Dijkstra; an unreachable target is simply absent
//! from the result, which the scheduler treats as infeasibility.

use petgraph::algo::{astar, dijkstra};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::TravelTimeUnit;
use crate::types::NetworkEdge;

#[derive(Debug, Error, PartialEq)]
pub enum NetworkError {
    #[error("Edge {0} - {1}: node ids must not be empty")]
    EmptyNodeId(String, String),

    #[error("Edge {0} - {1}: travel time must be a finite non-negative number (got {2})")]
    InvalidTravelTime(String, String, f64),
}

/// Summary counts for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
}

/// Travel-time graph keyed by node id.
#[derive(Debug, Clone, Default)]
pub struct NetworkGraph {
    graph: UnGraph<String, f64>,
    node_index: HashMap<String, NodeIndex>,
}

impl NetworkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from upstream edges, converting travel times to seconds.
    ///
    /// Invalid edges are logged and skipped; the rest of the graph is kept.
    pub fn from_edges(edges: &[NetworkEdge], unit: TravelTimeUnit) -> Self {
        let mut graph = Self::new();
        let mut skipped = 0usize;
        for edge in edges {
            let seconds = unit.to_seconds(edge.travel_time);
            if let Err(e) = graph.add_edge(&edge.from, &edge.to, seconds) {
                warn!(error = %e, "Skipping invalid network edge");
                skipped += 1;
            }
        }
        let stats = graph.stats();
        debug!(nodes = stats.nodes, edges = stats.edges, skipped, "Network graph built");
        graph
    }

    /// Add a node if it does not exist yet.
    pub fn add_node(&mut self, id: &str) -> NodeIndex {
        if let Some(idx) = self.node_index.get(id) {
            return *idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.node_index.insert(id.to_string(), idx);
        idx
    }

    /// Add an undirected edge weighted in seconds.
    pub fn add_edge(&mut self, a: &str, b: &str, seconds: f64) -> Result<(), NetworkError> {
        if a.is_empty() || b.is_empty() {
            return Err(NetworkError::EmptyNodeId(a.to_string(), b.to_string()));
        }
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(NetworkError::InvalidTravelTime(
                a.to_string(),
                b.to_string(),
                seconds,
            ));
        }
        let from = self.add_node(a);
        let to = self.add_node(b);
        self.graph.add_edge(from, to, seconds);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.graph.node_count(),
            edges: self.graph.edge_count(),
        }
    }

    /// Adjacency map: node id → neighbours with travel seconds.
    pub fn adjacency(&self) -> BTreeMap<String, Vec<(String, f64)>> {
        let mut adjacency: BTreeMap<String, Vec<(String, f64)>> = BTreeMap::new();
        for idx in self.graph.node_indices() {
            let id = self.graph[idx].clone();
            let neighbours = adjacency.entry(id).or_default();
            for edge in self.graph.edges(idx) {
                let other = if edge.source() == idx { edge.target() } else { edge.source() };
                neighbours.push((self.graph[other].clone(), *edge.weight()));
            }
            neighbours.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
        }
        adjacency
    }

    /// Shortest travel seconds from `source` to every reachable node.
    ///
    /// Unknown sources yield an empty map.
    pub fn shortest_from(&self, source: &str) -> HashMap<String, f64> {
        let Some(&start) = self.node_index.get(source) else {
            return HashMap::new();
        };
        dijkstra(&self.graph, start, None, |e| *e.weight())
            .into_iter()
            .map(|(idx, cost)| (self.graph[idx].clone(), cost))
            .collect()
    }

    /// Shortest travel seconds between two nodes, `None` when unreachable.
    pub fn travel_seconds(&self, from: &str, to: &str) -> Option<f64> {
        let start = *self.node_index.get(from)?;
        let goal = *self.node_index.get(to)?;
        if start == goal {
            return Some(0.0);
        }
        dijkstra(&self.graph, start, Some(goal), |e| *e.weight())
            .get(&goal)
            .copied()
    }

    /// Shortest path with its node sequence.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<(f64, Vec<String>)> {
        let start = *self.node_index.get(from)?;
        let goal = *self.node_index.get(to)?;
        let (cost, path) = astar(&self.graph, start, |n| n == goal, |e| *e.weight(), |_| 0.0)?;
        Some((cost, path.into_iter().map(|idx| self.graph[idx].clone()).collect()))
    }
}
