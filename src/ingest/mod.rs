//! Upstream Ingestion - normalization of raw JSON feeds
//!
//! Upstream payloads come in several shapes: a bare array, an array wrapped
//! under a container key, long-form or wide-form samples, and varying field
//! names. Everything is mapped onto the canonical types here, before any
//! algorithm runs.
//!
//! Rows that cannot be parsed are skipped and counted. A payload whose
//! overall shape is unknown is rejected with [`IngestError::DataUnavailable`].

pub mod source;

pub use source::{fetch_with_timeout, FileSource, SnapshotSource, StaticSource};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::types::{EntityMeta, NetworkEdge, Sample, TransportRecord};

/// Keys an upstream service may wrap its row array under.
const CONTAINER_KEYS: [&str; 8] = [
    "data", "items", "samples", "records", "tickets", "edges", "cauldrons", "entities",
];

/// Epoch numbers above this are milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("{feed} fetch timed out after {secs}s")]
    Timeout { feed: FeedKind, secs: u64 },

    #[error("failed to read {path}: {error}")]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("{feed} payload is not valid JSON: {error}")]
    Json {
        feed: FeedKind,
        #[source]
        error: serde_json::Error,
    },
}

// ============================================================================
// Feeds
// ============================================================================

/// One upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeedKind {
    Entities,
    Samples,
    Tickets,
    Edges,
}

impl FeedKind {
    pub const ALL: [FeedKind; 4] = [
        FeedKind::Entities,
        FeedKind::Samples,
        FeedKind::Tickets,
        FeedKind::Edges,
    ];

    /// File name used by [`FileSource`] and the snapshot generator.
    pub fn file_name(self) -> &'static str {
        match self {
            FeedKind::Entities => "entities.json",
            FeedKind::Samples => "samples.json",
            FeedKind::Tickets => "tickets.json",
            FeedKind::Edges => "edges.json",
        }
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedKind::Entities => write!(f, "entities"),
            FeedKind::Samples => write!(f, "samples"),
            FeedKind::Tickets => write!(f, "tickets"),
            FeedKind::Edges => write!(f, "edges"),
        }
    }
}

/// Parsed rows plus the number of malformed rows that were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub items: Vec<T>,
    pub skipped: usize,
}

impl<T> Normalized<T> {
    fn collect(rows: impl IntoIterator<Item = Option<Vec<T>>>) -> Self {
        let mut items = Vec::new();
        let mut skipped = 0;
        for row in rows {
            match row {
                Some(parsed) => items.extend(parsed),
                None => skipped += 1,
            }
        }
        Self { items, skipped }
    }
}

// ============================================================================
// Feed Normalizers
// ============================================================================

/// Normalize a samples payload (long form or wide form rows).
pub fn normalize_samples(payload: &Value) -> Result<Normalized<Sample>, IngestError> {
    let rows = rows_of(payload, FeedKind::Samples)?;
    let out = Normalized::collect(rows.iter().map(sample_rows));
    if out.skipped > 0 {
        debug!(skipped = out.skipped, kept = out.items.len(), "Skipped malformed samples");
    }
    Ok(out)
}

/// Normalize a transport ticket payload.
pub fn normalize_records(payload: &Value) -> Result<Normalized<TransportRecord>, IngestError> {
    let rows = rows_of(payload, FeedKind::Tickets)?;
    Ok(Normalized::collect(rows.iter().map(|r| record_row(r).map(|x| vec![x]))))
}

/// Normalize a travel edge payload. Travel times stay in the upstream unit.
pub fn normalize_edges(payload: &Value) -> Result<Normalized<NetworkEdge>, IngestError> {
    let rows = rows_of(payload, FeedKind::Edges)?;
    Ok(Normalized::collect(rows.iter().map(|r| edge_row(r).map(|x| vec![x]))))
}

/// Normalize entity metadata.
pub fn normalize_entities(payload: &Value) -> Result<Normalized<EntityMeta>, IngestError> {
    let rows = rows_of(payload, FeedKind::Entities)?;
    Ok(Normalized::collect(rows.iter().map(|r| entity_row(r).map(|x| vec![x]))))
}

fn rows_of(payload: &Value, feed: FeedKind) -> Result<&[Value], IngestError> {
    match payload {
        Value::Array(rows) => Ok(rows),
        Value::Object(map) => CONTAINER_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .map(Vec::as_slice)
            .ok_or_else(|| {
                IngestError::DataUnavailable(format!("unrecognized {feed} payload: no row array found"))
            }),
        _ => Err(IngestError::DataUnavailable(format!(
            "unrecognized {feed} payload: expected array or object"
        ))),
    }
}

fn sample_rows(row: &Value) -> Option<Vec<Sample>> {
    let obj = row.as_object()?;
    let timestamp = parse_timestamp(field(obj, &["timestamp", "time"])?)?;

    if let Some(levels) = field(obj, &["cauldron_levels", "levels"]).and_then(Value::as_object) {
        let samples: Vec<Sample> = levels
            .iter()
            .filter_map(|(id, v)| as_f64(v).map(|level| Sample::new(id.clone(), timestamp, level)))
            .collect();
        return (!samples.is_empty()).then_some(samples);
    }

    let entity_id = str_field(obj, &["entity_id", "cauldron_id"])?;
    let level = as_f64(field(obj, &["level", "value"])?)?;
    Some(vec![Sample::new(entity_id, timestamp, level)])
}

fn record_row(row: &Value) -> Option<TransportRecord> {
    let obj = row.as_object()?;
    Some(TransportRecord {
        id: str_field(obj, &["ticket_id", "id"])?,
        entity_id: str_field(obj, &["cauldron_id", "entity_id"])?,
        date: parse_date(field(obj, &["date", "timestamp"])?)?,
        declared_amount: as_f64(field(obj, &["amount_collected", "amount", "declared_amount"])?)?,
        status: str_field(obj, &["status"]).unwrap_or_else(|| "pending".to_string()),
    })
}

fn edge_row(row: &Value) -> Option<NetworkEdge> {
    let obj = row.as_object()?;
    Some(NetworkEdge {
        from: str_field(obj, &["from", "source"])?,
        to: str_field(obj, &["to", "target"])?,
        travel_time: as_f64(field(obj, &["travel_time", "travel_time_minutes", "weight"])?)?,
    })
}

fn entity_row(row: &Value) -> Option<EntityMeta> {
    let obj = row.as_object()?;
    let id = str_field(obj, &["id", "entity_id", "cauldron_id"])?;
    Some(EntityMeta {
        name: str_field(obj, &["name"]).unwrap_or_else(|| id.clone()),
        capacity: as_f64(field(obj, &["max_volume", "capacity"])?)?,
        level: field(obj, &["level"]).and_then(as_f64),
        id,
    })
}

// ============================================================================
// Field Helpers
// ============================================================================

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n)).filter(|v| !v.is_null())
}

/// String or integer id, trimmed; empty strings are rejected.
fn str_field(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    let s = match field(obj, names)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Finite number, accepting numeric strings.
fn as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// RFC 3339, naive ISO (UTC assumed) or unix epoch seconds/milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => from_epoch(n.as_f64()?),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(Utc.from_utc_datetime(&naive));
                }
            }
            s.parse::<f64>().ok().and_then(from_epoch)
        }
        _ => None,
    }
}

/// Calendar date from a plain `YYYY-MM-DD` or any accepted timestamp.
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    if let Some(s) = value.as_str() {
        if let Ok(date) = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
            return Some(date);
        }
    }
    parse_timestamp(value).map(|ts| ts.date_naive())
}

fn from_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() {
        return None;
    }
    let millis = if raw.abs() > EPOCH_MILLIS_THRESHOLD {
        raw
    } else {
        raw * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_long_and_wide_samples() {
        let long = json!([
            {"cauldron_id": "c1", "timestamp": "2024-11-08T10:00:00Z", "level": 50.5},
            {"entity_id": "c1", "time": "2024-11-08 10:01:00", "value": "49.0"},
            {"cauldron_id": "c1", "level": 10.0},
        ]);
        let out = normalize_samples(&long).expect("array payload");
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.skipped, 1);
        assert_eq!(out.items[1].level, 49.0);

        let wide = json!({"data": [
            {"timestamp": 1_731_060_000, "cauldron_levels": {"c1": 10.0, "c2": 20.0}},
        ]});
        let out = normalize_samples(&wide).expect("wrapped payload");
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.skipped, 0);
        assert_eq!(out.items[0].timestamp.timestamp(), 1_731_060_000);
    }

    #[test]
    fn test_unrecognized_shape_is_data_unavailable() {
        let err = normalize_samples(&json!({"unexpected": 1})).unwrap_err();
        assert!(matches!(err, IngestError::DataUnavailable(_)));
        assert!(normalize_edges(&json!("nope")).is_err());
    }

    #[test]
    fn test_records_aliases_and_default_status() {
        let payload = json!({"tickets": [
            {"ticket_id": "T1", "cauldron_id": "c1", "date": "2024-11-08", "amount_collected": 80},
            {"id": 7, "entity_id": "c2", "timestamp": "2024-11-09T23:59:00Z", "amount": 20.0, "status": "completed"},
            {"id": "T3", "entity_id": "c2", "date": "garbage", "amount": 5.0},
        ]});
        let out = normalize_records(&payload).expect("tickets");
        assert_eq!(out.skipped, 1);
        assert_eq!(out.items[0].status, "pending");
        assert_eq!(out.items[1].id, "7");
        assert_eq!(out.items[1].date, NaiveDate::from_ymd_opt(2024, 11, 9).expect("date"));
        assert!(out.items[1].is_completed());
    }

    #[test]
    fn test_edges_and_entities() {
        let edges = normalize_edges(&json!([
            {"source": "market", "target": "c1", "travel_time_minutes": 4.5},
            {"from": "c1", "to": "c2"},
        ]))
        .expect("edges");
        assert_eq!(edges.items.len(), 1);
        assert_eq!(edges.items[0].travel_time, 4.5);

        let entities = normalize_entities(&json!({"cauldrons": [
            {"id": "c1", "name": "Crimson", "max_volume": 1000},
            {"id": "c2", "capacity": 500, "level": 120.0},
        ]}))
        .expect("entities");
        assert_eq!(entities.items[0].name, "Crimson");
        assert_eq!(entities.items[1].name, "c2");
        assert_eq!(entities.items[1].level, Some(120.0));
    }

    #[test]
    fn test_epoch_units() {
        let secs = parse_timestamp(&json!(1_700_000_000)).expect("seconds");
        let millis = parse_timestamp(&json!(1_700_000_000_000_i64)).expect("millis");
        assert_eq!(secs, millis);
        assert!(parse_timestamp(&json!(true)).is_none());
    }
}
