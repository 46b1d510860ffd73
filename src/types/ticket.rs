//! Transport tickets and reconciliation results

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::DrainEpisode;

/// Ticket statuses that mean the transport is already settled upstream.
const COMPLETED_STATUSES: [&str; 5] = ["completed", "complete", "done", "resolved", "closed"];

/// An externally declared claim of volume removed from an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRecord {
    pub id: String,
    pub entity_id: String,
    pub date: NaiveDate,
    pub declared_amount: f64,
    pub status: String,
}

impl TransportRecord {
    /// Whether upstream already marked this ticket as settled
    pub fn is_completed(&self) -> bool {
        let status = self.status.trim();
        COMPLETED_STATUSES
            .iter()
            .any(|s| status.eq_ignore_ascii_case(s))
    }
}

/// How the calculated amount of a match was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    /// Closest same-day drain episode by volume
    ClosestEpisode,
    /// No episode that day; summed raw same-day decreases
    RawSeriesFallback,
    /// No drain observed at all on the ticket's day
    NoDrainObserved,
}

impl std::fmt::Display for MatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchReason::ClosestEpisode => write!(f, "matched closest same-day drain episode"),
            MatchReason::RawSeriesFallback => write!(f, "no episode; summed raw same-day decreases"),
            MatchReason::NoDrainObserved => write!(f, "no drain observed on ticket day"),
        }
    }
}

/// Outcome of reconciling one unresolved ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub ticket_id: String,
    pub entity_id: String,
    pub date: NaiveDate,
    pub declared_amount: f64,
    pub calculated_amount: Option<f64>,
    /// declared − calculated
    pub difference: Option<f64>,
    pub suspicious: bool,
    pub matched_episodes: Vec<DrainEpisode>,
    pub reason: MatchReason,
}

/// A drain episode no ticket accounts for (unlogged activity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmatchedDrain {
    pub entity_id: String,
    pub day: NaiveDate,
    pub episode: DrainEpisode,
}

/// Full result of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub matches: Vec<MatchResult>,
    pub unmatched_drains: Vec<UnmatchedDrain>,
}

impl ReconciliationReport {
    pub fn suspicious_count(&self) -> usize {
        self.matches.iter().filter(|m| m.suspicious).count()
    }
}
