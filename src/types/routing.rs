//! Travel graph edges, scheduling tasks and route plans

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Undirected travel link between two nodes.
///
/// `travel_time` is in the unit configured by `network.travel_time_unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEdge {
    pub from: String,
    pub to: String,
    pub travel_time: f64,
}

/// An entity that must be visited before `deadline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub entity_id: String,
    pub deadline: DateTime<Utc>,
}

/// One courier's ordered visits. The depot is the implicit start and end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub sequence: Vec<String>,
    /// Arrival time at each stop; empty when a stop is unreachable
    pub arrivals: Vec<DateTime<Utc>>,
    /// Time the courier is back at the depot and unloaded
    pub completes_at: Option<DateTime<Utc>>,
    pub impossible: bool,
}

/// Output of one scheduling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub required_couriers: usize,
    pub routes: Vec<Route>,
    /// Entities that cannot be reached before their deadline
    pub impossible: Vec<String>,
    pub computed_at: DateTime<Utc>,
}
