//! Monitored entities (cauldrons) and their raw level samples

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Invariant violations caught while building the entity registry.
///
/// These are the only conditions that stop the core: they indicate corrupt
/// static metadata, not noisy runtime data.
#[derive(Debug, Error, PartialEq)]
pub enum EntityError {
    #[error("Entity id must not be empty")]
    EmptyId,

    #[error("Entity {0}: capacity must be a positive finite number (got {1})")]
    InvalidCapacity(String, f64),

    #[error("Entity {0}: level must be a finite number (got {1})")]
    InvalidLevel(String, f64),

    #[error("Duplicate entity id: {0}")]
    Duplicate(String),
}

// ============================================================================
// Entity
// ============================================================================

/// Static metadata delivered once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub id: String,
    pub name: String,
    pub capacity: f64,
    /// Level at startup, if the metadata feed carries one
    #[serde(default)]
    pub level: Option<f64>,
}

/// A monitored container with a capacity and a time-varying fill level.
///
/// Rates are not stored here: they live in the shared
/// [`RateTable`](crate::estimation::RateTable) so the background refresh can
/// replace them without touching the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub capacity: f64,
    /// Last observed (or simulated) level
    pub level: f64,
    /// Timestamp of the sample that produced `level`
    pub level_observed_at: Option<DateTime<Utc>>,
    /// Set by reconciliation, cleared by a dispatch
    pub anomaly: bool,
}

impl Entity {
    /// Build an entity from metadata, rejecting impossible values.
    pub fn from_meta(meta: EntityMeta) -> Result<Self, EntityError> {
        if meta.id.trim().is_empty() {
            return Err(EntityError::EmptyId);
        }
        if !meta.capacity.is_finite() || meta.capacity <= 0.0 {
            return Err(EntityError::InvalidCapacity(meta.id, meta.capacity));
        }
        let level = meta.level.unwrap_or(0.0);
        if !level.is_finite() {
            return Err(EntityError::InvalidLevel(meta.id, level));
        }

        let name = if meta.name.is_empty() { meta.id.clone() } else { meta.name };
        Ok(Self {
            id: meta.id,
            name,
            capacity: meta.capacity,
            level: level.max(0.0),
            level_observed_at: None,
            anomaly: false,
        })
    }

    /// Fill level as a percentage of capacity
    pub fn percent_full(&self) -> f64 {
        percent_of(self.level, self.capacity)
    }

    /// Remaining room before overflow (never negative)
    pub fn headroom(&self) -> f64 {
        (self.capacity - self.level).max(0.0)
    }
}

/// `level` as a percentage of `capacity`, 0 when capacity is degenerate.
pub fn percent_of(level: f64, capacity: f64) -> f64 {
    if capacity > 0.0 {
        level / capacity * 100.0
    } else {
        0.0
    }
}

// ============================================================================
// Samples
// ============================================================================

/// One level reading for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: f64,
}

impl Sample {
    pub fn new(entity_id: impl Into<String>, timestamp: DateTime<Utc>, level: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            timestamp,
            level,
        }
    }
}

/// Per-entity series, each sorted ascending by timestamp.
pub type SeriesByEntity = BTreeMap<String, Vec<Sample>>;

/// Split a mixed sample stream into per-entity series sorted by timestamp.
///
/// Upstream delivery order is not guaranteed; the sort is stable so samples
/// sharing a timestamp keep their delivery order.
pub fn group_by_entity(samples: &[Sample]) -> SeriesByEntity {
    let mut series: SeriesByEntity = BTreeMap::new();
    for sample in samples {
        series
            .entry(sample.entity_id.clone())
            .or_default()
            .push(sample.clone());
    }
    for points in series.values_mut() {
        points.sort_by_key(|s| s.timestamp);
    }
    series
}

/// Minutes between two timestamps (fractional, negative if `to` precedes `from`).
pub fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meta(id: &str, capacity: f64) -> EntityMeta {
        EntityMeta {
            id: id.to_string(),
            name: String::new(),
            capacity,
            level: Some(40.0),
        }
    }

    #[test]
    fn test_from_meta_rejects_bad_capacity() {
        assert_eq!(
            Entity::from_meta(meta("c1", -5.0)),
            Err(EntityError::InvalidCapacity("c1".to_string(), -5.0))
        );
        assert!(Entity::from_meta(meta("c1", f64::NAN)).is_err());
        assert!(Entity::from_meta(meta("c1", 0.0)).is_err());
    }

    #[test]
    fn test_from_meta_defaults_name_to_id() {
        let entity = Entity::from_meta(meta("c7", 200.0)).expect("valid meta");
        assert_eq!(entity.name, "c7");
        assert_eq!(entity.percent_full(), 20.0);
        assert_eq!(entity.headroom(), 160.0);
    }

    #[test]
    fn test_group_by_entity_sorts_each_series() {
        let t = |m: i64| Utc.timestamp_opt(1_700_000_000 + m * 60, 0).unwrap();
        let samples = vec![
            Sample::new("b", t(2), 3.0),
            Sample::new("a", t(1), 2.0),
            Sample::new("b", t(0), 1.0),
        ];
        let series = group_by_entity(&samples);
        assert_eq!(series.len(), 2);
        let b: Vec<f64> = series["b"].iter().map(|s| s.level).collect();
        assert_eq!(b, vec![1.0, 3.0]);
    }

    #[test]
    fn test_minutes_between() {
        let a = Utc.timestamp_opt(0, 0).unwrap();
        let b = Utc.timestamp_opt(90, 0).unwrap();
        assert_eq!(minutes_between(a, b), 1.5);
        assert_eq!(minutes_between(b, a), -1.5);
    }
}
