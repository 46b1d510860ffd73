//! Detected drain episodes

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A contiguous drain detected in one entity's level series.
///
/// `day` is always the calendar day (UTC) of `start_ts`, and
/// `drained_volume` is never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainEpisode {
    pub entity_id: String,
    pub day: NaiveDate,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub start_level: f64,
    pub end_level: f64,
    pub duration_min: f64,
    /// Level drop plus inflow compensated over the episode duration
    pub drained_volume: f64,
}

/// Episodes of one entity grouped by calendar day.
pub type EpisodesByDay = BTreeMap<NaiveDate, Vec<DrainEpisode>>;

/// Episodes of every entity, keyed by entity id then day.
pub type EpisodeIndex = BTreeMap<String, EpisodesByDay>;
