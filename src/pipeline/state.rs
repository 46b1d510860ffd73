//! Snapshot and Status Types
//!
//! Shared state for the monitoring pipeline: the latest upstream snapshot
//! and the summaries the coordinator reports back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ingest::FeedKind;
use crate::types::{group_by_entity, NetworkEdge, Sample, SeriesByEntity, TransportRecord};

// ============================================================================
// Snapshot
// ============================================================================

/// The most recent successfully ingested upstream data.
///
/// Reconciliation and scheduling always run against one snapshot, so a
/// refresh landing mid-computation cannot mix old and new inputs.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Per-entity series, sorted by timestamp
    pub series: SeriesByEntity,
    pub sample_count: usize,
    pub records: Vec<TransportRecord>,
    pub edges: Vec<NetworkEdge>,
    pub samples_at: Option<DateTime<Utc>>,
    pub records_at: Option<DateTime<Utc>>,
    pub edges_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn set_samples(&mut self, samples: &[Sample], at: DateTime<Utc>) {
        self.series = group_by_entity(samples);
        self.sample_count = samples.len();
        self.samples_at = Some(at);
    }

    pub fn set_records(&mut self, records: Vec<TransportRecord>, at: DateTime<Utc>) {
        self.records = records;
        self.records_at = Some(at);
    }

    pub fn set_edges(&mut self, edges: Vec<NetworkEdge>, at: DateTime<Utc>) {
        self.edges = edges;
        self.edges_at = Some(at);
    }

    /// All samples, flattened in entity then timestamp order.
    pub fn samples(&self) -> Vec<Sample> {
        self.series.values().flatten().cloned().collect()
    }

    /// Latest sample of every entity.
    pub fn latest_levels(&self) -> BTreeMap<String, Sample> {
        self.series
            .iter()
            .filter_map(|(id, series)| series.last().map(|s| (id.clone(), s.clone())))
            .collect()
    }
}

// ============================================================================
// Refresh Report
// ============================================================================

/// What happened to one feed during a refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FeedOutcome {
    /// Feed replaced with fresh data
    Updated { items: usize, skipped: usize },
    /// Feed failed; the previous data stays in place
    Unavailable { reason: String },
}

impl FeedOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, FeedOutcome::Updated { .. })
    }
}

/// Per-feed result of `Coordinator::refresh_from_source`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub feeds: BTreeMap<String, FeedOutcome>,
    /// Entities whose rate was replaced
    pub rates_updated: usize,
}

impl RefreshReport {
    pub fn record(&mut self, feed: FeedKind, outcome: FeedOutcome) {
        self.feeds.insert(feed.to_string(), outcome);
    }

    pub fn outcome(&self, feed: FeedKind) -> Option<&FeedOutcome> {
        self.feeds.get(&feed.to_string())
    }
}

// ============================================================================
// Pipeline Statistics
// ============================================================================

/// Summary counters for the `status` view and watch-mode logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub site: String,
    pub entities: usize,
    pub samples: usize,
    pub records: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub rated_entities: usize,
    pub draining: usize,
    pub resolved_tickets: usize,
    pub anomalies: usize,
    pub samples_at: Option<DateTime<Utc>>,
}
