//! Fill / drain rate estimates

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Robust per-entity rates in units per minute. Both are always >= 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRates {
    #[serde(rename = "fill_rate_per_min")]
    pub fill_rate: f64,
    #[serde(rename = "drain_rate_per_min")]
    pub drain_rate: f64,
}

impl EntityRates {
    pub fn new(fill_rate: f64, drain_rate: f64) -> Self {
        Self { fill_rate, drain_rate }
    }
}

/// Rate map keyed by entity id.
pub type RateMap = BTreeMap<String, EntityRates>;
