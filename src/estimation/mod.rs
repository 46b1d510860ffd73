//! Rate Estimator - robust fill/drain rates from raw level history
//!
//! Every consecutive pair of samples yields one candidate rate: rising
//! intervals feed the fill set, falling intervals the drain set. Each set
//! is reduced with the median so a single sensor spike cannot drag the
//! estimate, then clamped to a plausible range.
//!
//! ## Degradation
//!
//! - Intervals with Δt <= 0 (duplicates, reordering) or Δt beyond
//!   `rates.max_interval_minutes` (stale gaps) are skipped.
//! - An entity with no usable interval gets no entry at all; callers keep
//!   the previous rate (InsufficientHistory).
//! - A rate outside `[0, max]` is sensor corruption and resets to 0.

mod table;

pub use table::RateTable;

use statrs::statistics::{Data, Median, Statistics};
use tracing::{debug, warn};

use crate::config::RateConfig;
use crate::types::{group_by_entity, minutes_between, EntityRates, RateMap, Sample};

/// Result of one estimation pass over a mixed sample stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateEstimate {
    /// Entities with enough history for an estimate
    pub rates: RateMap,
    /// Entities skipped for lack of usable intervals
    pub insufficient: Vec<String>,
}

/// Robust per-entity rate estimator.
#[derive(Debug, Clone, Default)]
pub struct RateEstimator {
    config: RateConfig,
}

impl RateEstimator {
    pub fn new(config: RateConfig) -> Self {
        Self { config }
    }

    /// Estimate rates for every entity present in `samples`.
    ///
    /// Samples may arrive unsorted and interleaved across entities.
    pub fn estimate(&self, samples: &[Sample]) -> RateEstimate {
        let mut estimate = RateEstimate::default();

        for (entity_id, series) in group_by_entity(samples) {
            match self.estimate_sorted(&entity_id, &series) {
                Some(rates) => {
                    estimate.rates.insert(entity_id, rates);
                }
                None => {
                    debug!(entity_id = %entity_id, samples = series.len(), "Insufficient history for rate estimate");
                    estimate.insufficient.push(entity_id);
                }
            }
        }

        estimate
    }

    /// Estimate rates for a single entity's series (any order).
    pub fn estimate_series(&self, series: &[Sample]) -> Option<EntityRates> {
        let mut sorted = series.to_vec();
        sorted.sort_by_key(|s| s.timestamp);
        let entity_id = sorted.first().map(|s| s.entity_id.clone()).unwrap_or_default();
        self.estimate_sorted(&entity_id, &sorted)
    }

    fn estimate_sorted(&self, entity_id: &str, series: &[Sample]) -> Option<EntityRates> {
        if series.len() < 2 {
            return None;
        }

        let mut fill_candidates = Vec::new();
        let mut drain_candidates = Vec::new();
        let mut usable_intervals = 0usize;

        for pair in series.windows(2) {
            let dt = minutes_between(pair[0].timestamp, pair[1].timestamp);
            if dt <= 0.0 || dt > self.config.max_interval_minutes {
                continue;
            }
            let delta = pair[1].level - pair[0].level;
            if !delta.is_finite() {
                continue;
            }
            usable_intervals += 1;

            if delta > 0.0 {
                fill_candidates.push(delta / dt);
            } else if delta < 0.0 {
                drain_candidates.push(-delta / dt);
            }
        }

        if usable_intervals == 0 {
            return None;
        }

        let fill_rate = clamp_rate(
            entity_id,
            "fill",
            robust_rate(&fill_candidates),
            self.config.max_fill_rate,
        );
        let drain_rate = clamp_rate(
            entity_id,
            "drain",
            robust_rate(&drain_candidates),
            self.config.max_drain_rate,
        );

        Some(EntityRates::new(fill_rate, drain_rate))
    }
}

/// Median of the candidates, falling back to the mean, then to 0.
fn robust_rate(candidates: &[f64]) -> f64 {
    if candidates.is_empty() {
        return 0.0;
    }

    let median = Data::new(candidates.to_vec()).median();
    if median.is_finite() {
        return median;
    }

    let mean = candidates.iter().mean();
    if mean.is_finite() {
        mean
    } else {
        0.0
    }
}

/// Out-of-range rates are sensor corruption and reset to 0.
fn clamp_rate(entity_id: &str, kind: &str, rate: f64, max: f64) -> f64 {
    if rate.is_finite() && (0.0..=max).contains(&rate) {
        rate
    } else {
        warn!(entity_id = %entity_id, kind, rate, max, "Implausible rate treated as sensor corruption, reset to 0");
        0.0
    }
}
