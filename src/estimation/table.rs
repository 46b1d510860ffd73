//! Shared rate table
//!
//! Written by the background refresh and by explicit refresh requests,
//! read by every status and forecast call. Writers compute outside the
//! lock and only merge under it, so readers never wait on estimation work.

use tokio::sync::RwLock;

use crate::types::{EntityRates, RateMap};

/// Lock-guarded map of entity id to current rates.
#[derive(Debug, Default)]
pub struct RateTable {
    inner: RwLock<RateMap>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table (e.g. with rates from a previous run).
    pub fn with_rates(rates: RateMap) -> Self {
        Self {
            inner: RwLock::new(rates),
        }
    }

    /// Current rates for one entity, zero when never estimated.
    pub async fn get(&self, entity_id: &str) -> EntityRates {
        self.inner
            .read()
            .await
            .get(entity_id)
            .copied()
            .unwrap_or_default()
    }

    /// Consistent copy of the whole table.
    pub async fn snapshot(&self) -> RateMap {
        self.inner.read().await.clone()
    }

    /// Replace the table with a freshly recomputed one.
    ///
    /// Entities missing from `recomputed` keep their previous rate, so an
    /// entity with insufficient history this cycle is not reset to zero.
    /// Returns the number of entities whose rate was updated.
    pub async fn apply_recomputed(&self, recomputed: RateMap) -> usize {
        let updated = recomputed.len();
        self.inner.write().await.extend(recomputed);
        updated
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
