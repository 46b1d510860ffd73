//! Coordinator - every core operation over one consistent snapshot
//!
//! ```text
//! samples ──► RateEstimator ──► RateTable ─┐
//!        └──► DrainSegmenter ◄─────────────┘ (fill compensation)
//!                   │
//!                   ▼
//! tickets ──► TicketReconciler ──► report + anomaly flags
//!
//! levels + rates ──► forecast ──► tasks ──► DispatchScheduler (+ graph) ──► plan
//! dispatch ──► DrainSimulator ──► live levels, resolved tickets
//! ```
//!
//! Lock scopes never overlap: each step takes one lock, copies what it
//! needs and releases it before the next.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration as StdDuration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::state::{FeedOutcome, PipelineStats, RefreshReport, Snapshot};
use crate::config::OpsConfig;
use crate::dispatch::{self, DispatchScheduler};
use crate::estimation::{RateEstimator, RateTable};
use crate::ingest::{
    fetch_with_timeout, normalize_edges, normalize_entities, normalize_records,
    normalize_samples, FeedKind, IngestError, SnapshotSource,
};
use crate::network::NetworkGraph;
use crate::reconciliation::TicketReconciler;
use crate::segmentation::DrainSegmenter;
use crate::simulator::DrainSimulator;
use crate::types::{
    DispatchResult, DispatchStatus, DrainProgress, Entity, EntityError, EntityMeta,
    EpisodeIndex, Forecast, LiveStatus, NetworkEdge, RateMap, ReconciliationReport, RoutePlan,
    Sample, TransportRecord,
};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error(transparent)]
    Entity(#[from] EntityError),

    #[error("Entity metadata unavailable: {0}")]
    Metadata(#[from] IngestError),
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct Coordinator {
    config: OpsConfig,
    entities: RwLock<BTreeMap<String, Entity>>,
    rates: RateTable,
    estimator: RateEstimator,
    segmenter: DrainSegmenter,
    reconciler: TicketReconciler,
    simulator: DrainSimulator,
    snapshot: RwLock<Snapshot>,
    graph: RwLock<NetworkGraph>,
}

impl Coordinator {
    /// Build the coordinator and its entity registry.
    ///
    /// Invalid or duplicate metadata is a hard error: the registry is
    /// created once and never repaired later.
    pub fn new(config: OpsConfig, metadata: Vec<EntityMeta>) -> Result<Self, CoordinatorError> {
        let mut entities = BTreeMap::new();
        for meta in metadata {
            let entity = Entity::from_meta(meta)?;
            if entities.contains_key(&entity.id) {
                return Err(EntityError::Duplicate(entity.id).into());
            }
            entities.insert(entity.id.clone(), entity);
        }

        info!(site = %config.site.name, entities = entities.len(), "Coordinator initialized");

        Ok(Self {
            estimator: RateEstimator::new(config.rates.clone()),
            segmenter: DrainSegmenter::new(config.segmentation.clone()),
            reconciler: TicketReconciler::new(config.reconciliation.clone()),
            simulator: DrainSimulator::new(&config.simulator),
            entities: RwLock::new(entities),
            rates: RateTable::new(),
            snapshot: RwLock::new(Snapshot::default()),
            graph: RwLock::new(NetworkGraph::new()),
            config,
        })
    }

    /// Build from a source: entity metadata is required, every other feed
    /// is loaded best-effort.
    pub async fn from_source(
        config: OpsConfig,
        source: &dyn SnapshotSource,
        now: DateTime<Utc>,
    ) -> Result<(Self, RefreshReport), CoordinatorError> {
        let timeout = StdDuration::from_secs(config.ingest.fetch_timeout_secs);
        let payload = fetch_with_timeout(source, FeedKind::Entities, timeout).await?;
        let metadata = normalize_entities(&payload)?;
        if metadata.skipped > 0 {
            warn!(skipped = metadata.skipped, "Skipped malformed entity rows");
        }

        let coordinator = Self::new(config, metadata.items)?;
        let mut report = coordinator.refresh_from_source(source, now).await;
        report.record(
            FeedKind::Entities,
            FeedOutcome::Updated {
                items: coordinator.entities.read().await.len(),
                skipped: metadata.skipped,
            },
        );
        Ok((coordinator, report))
    }

    pub fn config(&self) -> &OpsConfig {
        &self.config
    }

    pub fn simulator(&self) -> &DrainSimulator {
        &self.simulator
    }

    pub fn rate_table(&self) -> &RateTable {
        &self.rates
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Replace the snapshot with already-normalized data and re-estimate rates.
    pub async fn ingest_snapshot(
        &self,
        samples: Vec<Sample>,
        records: Vec<TransportRecord>,
        edges: Vec<NetworkEdge>,
        now: DateTime<Utc>,
    ) -> usize {
        self.replace_samples(&samples, now).await;
        self.snapshot.write().await.set_records(records, now);
        self.replace_edges(edges, now).await;
        self.refresh_rates().await
    }

    /// Pull every feed from `source`. A failing feed keeps its previous data.
    pub async fn refresh_from_source(
        &self,
        source: &dyn SnapshotSource,
        now: DateTime<Utc>,
    ) -> RefreshReport {
        let timeout = StdDuration::from_secs(self.config.ingest.fetch_timeout_secs);
        let mut report = RefreshReport::default();

        let samples = fetch_with_timeout(source, FeedKind::Samples, timeout)
            .await
            .and_then(|v| normalize_samples(&v));
        let outcome = match samples {
            Ok(n) => {
                self.replace_samples(&n.items, now).await;
                FeedOutcome::Updated { items: n.items.len(), skipped: n.skipped }
            }
            Err(e) => unavailable(source, FeedKind::Samples, &e),
        };
        report.record(FeedKind::Samples, outcome);

        let records = fetch_with_timeout(source, FeedKind::Tickets, timeout)
            .await
            .and_then(|v| normalize_records(&v));
        let outcome = match records {
            Ok(n) => {
                let outcome = FeedOutcome::Updated { items: n.items.len(), skipped: n.skipped };
                self.snapshot.write().await.set_records(n.items, now);
                outcome
            }
            Err(e) => unavailable(source, FeedKind::Tickets, &e),
        };
        report.record(FeedKind::Tickets, outcome);

        let edges = fetch_with_timeout(source, FeedKind::Edges, timeout)
            .await
            .and_then(|v| normalize_edges(&v));
        let outcome = match edges {
            Ok(n) => {
                let outcome = FeedOutcome::Updated { items: n.items.len(), skipped: n.skipped };
                self.replace_edges(n.items, now).await;
                outcome
            }
            Err(e) => unavailable(source, FeedKind::Edges, &e),
        };
        report.record(FeedKind::Edges, outcome);

        report.rates_updated = self.refresh_rates().await;
        report
    }

    async fn replace_samples(&self, samples: &[Sample], now: DateTime<Utc>) {
        let latest = {
            let mut snapshot = self.snapshot.write().await;
            snapshot.set_samples(samples, now);
            snapshot.latest_levels()
        };

        let mut entities = self.entities.write().await;
        let mut unknown = 0usize;
        for (id, sample) in latest {
            let Some(entity) = entities.get_mut(&id) else {
                unknown += 1;
                continue;
            };
            if entity.level_observed_at.map_or(true, |at| sample.timestamp > at) {
                entity.level = sample.level.max(0.0);
                entity.level_observed_at = Some(sample.timestamp);
            }
        }
        if unknown > 0 {
            debug!(unknown, "Samples reference entities missing from metadata");
        }
    }

    async fn replace_edges(&self, edges: Vec<NetworkEdge>, now: DateTime<Utc>) {
        let graph = NetworkGraph::from_edges(&edges, self.config.network.travel_time_unit);
        let stats = graph.stats();
        if !graph.contains(&self.config.network.depot_id) {
            warn!(depot = %self.config.network.depot_id, "Travel graph has no depot node");
        }
        *self.graph.write().await = graph;
        self.snapshot.write().await.set_edges(edges, now);
        debug!(nodes = stats.nodes, edges = stats.edges, "Travel graph rebuilt");
    }

    // ========================================================================
    // Rates & Episodes
    // ========================================================================

    /// Re-estimate rates from the current snapshot.
    ///
    /// Entities without enough history keep their previous rate.
    pub async fn refresh_rates(&self) -> usize {
        let samples = self.snapshot.read().await.samples();
        let estimate = self.estimator.estimate(&samples);
        if !estimate.insufficient.is_empty() {
            debug!(entities = ?estimate.insufficient, "Keeping previous rates");
        }
        self.rates.apply_recomputed(estimate.rates).await
    }

    pub async fn rates(&self) -> RateMap {
        self.rates.snapshot().await
    }

    /// Drain episodes of the current snapshot, grouped by entity and day.
    pub async fn episodes(&self) -> EpisodeIndex {
        let rates = self.rates.snapshot().await;
        let snapshot = self.snapshot.read().await;
        self.segmenter.segment_all(&snapshot.series, &rates)
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Reconcile tickets against observed drains and refresh anomaly flags.
    pub async fn reconcile(&self) -> ReconciliationReport {
        let rates = self.rates.snapshot().await;
        let resolved = self.simulator.resolved_ids().await;
        let report = {
            let snapshot = self.snapshot.read().await;
            let episodes = self.segmenter.segment_all(&snapshot.series, &rates);
            self.reconciler
                .reconcile(&snapshot.records, &resolved, &episodes, &snapshot.series)
        };

        let flagged: BTreeSet<&str> = report
            .matches
            .iter()
            .filter(|m| m.suspicious)
            .map(|m| m.entity_id.as_str())
            .chain(report.unmatched_drains.iter().map(|u| u.entity_id.as_str()))
            .collect();

        let mut entities = self.entities.write().await;
        for entity in entities.values_mut() {
            entity.anomaly = flagged.contains(entity.id.as_str());
        }

        info!(
            tickets = report.matches.len(),
            suspicious = report.suspicious_count(),
            unmatched_drains = report.unmatched_drains.len(),
            flagged = flagged.len(),
            "Reconciliation complete"
        );
        report
    }

    // ========================================================================
    // Forecast & Routing
    // ========================================================================

    /// Overflow forecast for every entity, soonest first.
    pub async fn forecast(&self, now: DateTime<Utc>) -> Vec<Forecast> {
        let live = self.live_entities(now).await;
        let rates = self.rates.snapshot().await;
        dispatch::forecast_all(live.iter().map(|(e, _)| e), &rates, now)
    }

    /// Plan courier routes for every entity overflowing within the horizon.
    pub async fn plan_routes(&self, now: DateTime<Utc>) -> RoutePlan {
        let live = self.live_entities(now).await;
        let rates = self.rates.snapshot().await;
        let draining: HashSet<String> = live
            .iter()
            .filter(|(_, p)| p.as_ref().is_some_and(|p| !p.completed))
            .map(|(e, _)| e.id.clone())
            .collect();

        let forecasts = dispatch::forecast_all(live.iter().map(|(e, _)| e), &rates, now);
        let horizon = dispatch::forecast::minutes(self.config.dispatch.horizon_hours * 60.0)
            .unwrap_or(Duration::MAX);
        let tasks = dispatch::tasks_from_forecasts(&forecasts, horizon, &draining, now);

        let graph = self.graph.read().await;
        DispatchScheduler::new(&graph, self.config.network.depot_id.clone(), &self.config.dispatch)
            .plan(&tasks, now)
    }

    // ========================================================================
    // Live Status & Dispatch
    // ========================================================================

    /// Live view of one entity.
    pub async fn live_status(&self, entity_id: &str, now: DateTime<Utc>) -> Result<LiveStatus, CoordinatorError> {
        self.all_status(now)
            .await
            .into_iter()
            .find(|s| s.entity_id == entity_id)
            .ok_or_else(|| CoordinatorError::UnknownEntity(entity_id.to_string()))
    }

    /// Live view of every entity, in id order.
    pub async fn all_status(&self, now: DateTime<Utc>) -> Vec<LiveStatus> {
        let live = self.live_entities(now).await;
        let rates = self.rates.snapshot().await;

        live.into_iter()
            .map(|(entity, progress)| {
                let fill_rate = rates.get(&entity.id).map_or(0.0, |r| r.fill_rate);
                let is_draining = progress.as_ref().is_some_and(|p| !p.completed);
                let time_to_full_seconds = if is_draining {
                    None
                } else {
                    dispatch::minutes_to_full(entity.level, entity.capacity, fill_rate).map(|m| m * 60.0)
                };
                LiveStatus {
                    percent_full: entity.percent_full(),
                    entity_id: entity.id,
                    name: entity.name,
                    current_level: entity.level,
                    capacity: entity.capacity,
                    fill_rate_per_min: fill_rate,
                    time_to_full_seconds,
                    is_draining,
                    drain_progress: progress,
                    anomaly: entity.anomaly,
                }
            })
            .collect()
    }

    /// Start draining an entity.
    pub async fn dispatch(&self, entity_id: &str, now: DateTime<Utc>) -> Result<DispatchResult, CoordinatorError> {
        // Settle any finished drain first so a completed entity reads as empty
        let live = self.live_entities(now).await;
        let entity = live
            .into_iter()
            .map(|(e, _)| e)
            .find(|e| e.id == entity_id)
            .ok_or_else(|| CoordinatorError::UnknownEntity(entity_id.to_string()))?;

        let drain_rate = self.rates.get(entity_id).await.drain_rate;
        let result = self.simulator.dispatch_at(&entity, drain_rate, now).await;

        if result.status == DispatchStatus::Started {
            if let Some(e) = self.entities.write().await.get_mut(entity_id) {
                e.anomaly = false;
            }
        }
        Ok(result)
    }

    /// Forget every resolved ticket.
    pub async fn reset_resolved(&self) -> usize {
        self.simulator.reset_resolved().await
    }

    pub async fn stats(&self) -> PipelineStats {
        let (samples, records, samples_at) = {
            let s = self.snapshot.read().await;
            (s.sample_count, s.records.len(), s.samples_at)
        };
        let graph = self.graph.read().await.stats();
        let (entities, anomalies) = {
            let e = self.entities.read().await;
            (e.len(), e.values().filter(|x| x.anomaly).count())
        };

        PipelineStats {
            site: self.config.site.name.clone(),
            entities,
            samples,
            records,
            graph_nodes: graph.nodes,
            graph_edges: graph.edges,
            rated_entities: self.rates.len().await,
            draining: self.simulator.draining_entities().await.len(),
            resolved_tickets: self.simulator.resolved_ids().await.len(),
            anomalies,
            samples_at,
        }
    }

    /// Advance every active drain to `now` and return entities with their
    /// live level. Completed drains settle the entity at level 0.
    async fn live_entities(&self, now: DateTime<Utc>) -> Vec<(Entity, Option<DrainProgress>)> {
        let draining = self.simulator.draining_entities().await;
        let mut progress: HashMap<String, DrainProgress> = HashMap::new();
        if !draining.is_empty() {
            let records = self.snapshot.read().await.records.clone();
            for id in draining {
                if let Some(p) = self.simulator.progress_at(&id, &records, now).await {
                    progress.insert(id, p);
                }
            }
        }

        let completed: Vec<&String> = progress
            .iter()
            .filter(|(_, p)| p.completed)
            .map(|(id, _)| id)
            .collect();
        if !completed.is_empty() {
            let mut entities = self.entities.write().await;
            for id in completed {
                if let Some(e) = entities.get_mut(id) {
                    e.level = 0.0;
                    e.level_observed_at = Some(now);
                }
            }
        }

        let entities = self.entities.read().await;
        entities
            .values()
            .map(|e| {
                let mut entity = e.clone();
                let p = progress.remove(&e.id);
                if let Some(p) = &p {
                    entity.level = p.remaining_level;
                }
                (entity, p)
            })
            .collect()
    }
}

fn unavailable(source: &dyn SnapshotSource, feed: FeedKind, error: &IngestError) -> FeedOutcome {
    warn!(source = source.source_name(), feed = %feed, error = %error, "Feed unavailable, keeping previous data");
    FeedOutcome::Unavailable {
        reason: error.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
