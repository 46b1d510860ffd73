//! Live status, forecasts and dispatch command results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress of an in-flight drain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainProgress {
    pub started_at: DateTime<Utc>,
    pub initial_level: f64,
    pub remaining_level: f64,
    pub drain_rate: f64,
    pub percent_complete: f64,
    pub estimated_completion: DateTime<Utc>,
    pub completed: bool,
}

/// Live view of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStatus {
    pub entity_id: String,
    pub name: String,
    pub current_level: f64,
    pub capacity: f64,
    pub percent_full: f64,
    pub fill_rate_per_min: f64,
    pub time_to_full_seconds: Option<f64>,
    pub is_draining: bool,
    pub drain_progress: Option<DrainProgress>,
    pub anomaly: bool,
}

/// Forecasted overflow of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub entity_id: String,
    pub name: String,
    pub current_level: f64,
    pub capacity: f64,
    pub fill_rate_per_min: f64,
    /// Absent when the entity is not filling
    pub time_to_full_minutes: Option<f64>,
    pub overflow_at: Option<DateTime<Utc>>,
}

/// Outcome category of a dispatch command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Started,
    AlreadyDraining,
    AlreadyEmpty,
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchStatus::Started => write!(f, "started"),
            DispatchStatus::AlreadyDraining => write!(f, "already_draining"),
            DispatchStatus::AlreadyEmpty => write!(f, "already_empty"),
        }
    }
}

/// Result of a dispatch command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub status: DispatchStatus,
    pub entity_id: String,
    pub entity_name: String,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub drain_rate: Option<f64>,
    pub already_draining: bool,
    pub already_empty: bool,
    pub progress: Option<DrainProgress>,
}
