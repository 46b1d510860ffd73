//! Drain Simulator - tracks in-flight dispatches and projects live levels
//!
//! State machine per entity:
//!
//! ```text
//! Idle --dispatch--> Draining --remaining <= 0--> Idle (+ tickets resolved)
//! ```
//!
//! The active registry and the resolved-ticket set are each guarded by their
//! own mutex. When both are needed they are taken in that order (active,
//! then resolved).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::SimulatorConfig;
use crate::dispatch::forecast::after_minutes;
use crate::types::{
    minutes_between, DispatchResult, DispatchStatus, DrainProgress, Entity, TransportRecord,
};

/// One accepted dispatch, alive until the entity is drained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveDispatch {
    pub entity_id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub initial_level: f64,
    pub drain_rate: f64,
}

impl ActiveDispatch {
    /// Project this dispatch forward to `now`.
    pub fn progress_at(&self, now: DateTime<Utc>) -> DrainProgress {
        let elapsed = minutes_between(self.start_time, now).max(0.0);
        let remaining = (self.initial_level - elapsed * self.drain_rate).max(0.0);
        let percent_complete = if self.initial_level > 0.0 {
            ((self.initial_level - remaining) / self.initial_level * 100.0).clamp(0.0, 100.0)
        } else {
            100.0
        };
        DrainProgress {
            started_at: self.start_time,
            initial_level: self.initial_level,
            remaining_level: remaining,
            drain_rate: self.drain_rate,
            percent_complete,
            estimated_completion: after_minutes(self.start_time, self.initial_level / self.drain_rate)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            completed: remaining <= 0.0,
        }
    }
}

/// Concurrency-safe registry of active dispatches and resolved tickets.
#[derive(Debug)]
pub struct DrainSimulator {
    min_drain_rate: f64,
    active: Mutex<HashMap<String, ActiveDispatch>>,
    resolved: Mutex<BTreeSet<String>>,
}

impl DrainSimulator {
    pub fn new(config: &SimulatorConfig) -> Self {
        Self {
            min_drain_rate: config.min_drain_rate,
            active: Mutex::new(HashMap::new()),
            resolved: Mutex::new(BTreeSet::new()),
        }
    }

    /// Accept a dispatch command for `entity` at `now`.
    ///
    /// The check and the insert happen under one lock, so two concurrent
    /// commands for the same entity create a single dispatch.
    pub async fn dispatch_at(
        &self,
        entity: &Entity,
        natural_drain_rate: f64,
        now: DateTime<Utc>,
    ) -> DispatchResult {
        let mut active = self.active.lock().await;

        if let Some(existing) = active.get(&entity.id) {
            let progress = existing.progress_at(now);
            debug!(entity = %entity.id, remaining = progress.remaining_level, "Dispatch ignored, already draining");
            return DispatchResult {
                status: DispatchStatus::AlreadyDraining,
                entity_id: entity.id.clone(),
                entity_name: entity.name.clone(),
                estimated_completion: Some(progress.estimated_completion),
                drain_rate: Some(existing.drain_rate),
                already_draining: true,
                already_empty: false,
                progress: Some(progress),
            };
        }

        if entity.level <= 0.0 {
            debug!(entity = %entity.id, "Dispatch ignored, already empty");
            return DispatchResult {
                status: DispatchStatus::AlreadyEmpty,
                entity_id: entity.id.clone(),
                entity_name: entity.name.clone(),
                estimated_completion: None,
                drain_rate: None,
                already_draining: false,
                already_empty: true,
                progress: None,
            };
        }

        let drain_rate = if natural_drain_rate.is_finite() {
            natural_drain_rate.max(self.min_drain_rate)
        } else {
            self.min_drain_rate
        };
        let dispatch = ActiveDispatch {
            entity_id: entity.id.clone(),
            name: entity.name.clone(),
            start_time: now,
            initial_level: entity.level,
            drain_rate,
        };
        let progress = dispatch.progress_at(now);
        active.insert(entity.id.clone(), dispatch);

        info!(
            entity = %entity.id,
            initial_level = entity.level,
            drain_rate,
            eta = %progress.estimated_completion,
            "Dispatch started"
        );

        DispatchResult {
            status: DispatchStatus::Started,
            entity_id: entity.id.clone(),
            entity_name: entity.name.clone(),
            estimated_completion: Some(progress.estimated_completion),
            drain_rate: Some(drain_rate),
            already_draining: false,
            already_empty: false,
            progress: Some(progress),
        }
    }

    /// Current progress of the entity's dispatch, if any.
    ///
    /// When the drain has finished the dispatch is removed and every
    /// outstanding ticket of the entity in `records` is marked resolved.
    /// The returned progress then has `completed == true`.
    pub async fn progress_at(
        &self,
        entity_id: &str,
        records: &[TransportRecord],
        now: DateTime<Utc>,
    ) -> Option<DrainProgress> {
        let mut active = self.active.lock().await;
        let progress = active.get(entity_id)?.progress_at(now);
        if !progress.completed {
            return Some(progress);
        }

        active.remove(entity_id);
        let mut resolved = self.resolved.lock().await;
        let before = resolved.len();
        resolved.extend(
            records
                .iter()
                .filter(|r| r.entity_id == entity_id && !r.is_completed())
                .map(|r| r.id.clone()),
        );
        info!(
            entity = %entity_id,
            tickets_resolved = resolved.len() - before,
            "Dispatch completed"
        );
        Some(progress)
    }

    pub async fn is_draining(&self, entity_id: &str) -> bool {
        self.active.lock().await.contains_key(entity_id)
    }

    /// Ids of entities with an active dispatch, sorted.
    pub async fn draining_entities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn active_dispatch(&self, entity_id: &str) -> Option<ActiveDispatch> {
        self.active.lock().await.get(entity_id).cloned()
    }

    /// Snapshot of the resolved-ticket set.
    pub async fn resolved_ids(&self) -> BTreeSet<String> {
        self.resolved.lock().await.clone()
    }

    /// Clear the resolved-ticket set. Returns how many ids were dropped.
    pub async fn reset_resolved(&self) -> usize {
        let mut resolved = self.resolved.lock().await;
        let cleared = resolved.len();
        resolved.clear();
        info!(cleared, "Resolved ticket set reset");
        cleared
    }
}

// ============================================================================
// Tests
// ============================================================================
