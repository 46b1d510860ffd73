//! Ticket Reconciler - declared transport amounts vs observed drains
//!
//! For every unresolved ticket the reconciler looks up the drain episodes of
//! the ticket's entity on the ticket's calendar day and takes the one whose
//! volume is closest to the declared amount (first wins on ties). When the
//! day has no episode, it falls back to summing the raw same-day decreases.
//!
//! ## Suspicion Rule
//!
//! A ticket is suspicious only when |declared - calculated| exceeds BOTH
//! the absolute floor AND the relative fraction of the declared amount.
//! A ticket with no calculable drain is suspicious only above the
//! materiality threshold.
//!
//! Episodes no ticket claims are reported as unmatched drains.
//!
//! The computation is pure: the same snapshot always yields the same report.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::config::ReconciliationConfig;
use crate::types::{
    DrainEpisode, EpisodeIndex, MatchReason, MatchResult, ReconciliationReport, Sample,
    SeriesByEntity, TransportRecord, UnmatchedDrain,
};

/// Identifies one episode inside an [`EpisodeIndex`]: (entity, day, position).
type EpisodeKey = (String, NaiveDate, usize);

/// Ticket-to-drain reconciler
#[derive(Debug, Clone, Default)]
pub struct TicketReconciler {
    config: ReconciliationConfig,
}

impl TicketReconciler {
    pub fn new(config: ReconciliationConfig) -> Self {
        Self { config }
    }

    /// Reconcile tickets against episodes and raw series.
    ///
    /// # Arguments
    /// * `records` - every known ticket (duplicates allowed)
    /// * `resolved` - ticket ids settled by completed dispatches
    /// * `episodes` - segmented episodes by entity and day
    /// * `series` - raw per-entity series, used when a day has no episode
    pub fn reconcile(
        &self,
        records: &[TransportRecord],
        resolved: &BTreeSet<String>,
        episodes: &EpisodeIndex,
        series: &SeriesByEntity,
    ) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();
        let mut claimed: HashSet<EpisodeKey> = HashSet::new();

        for record in dedupe(records) {
            let (calculated, matched, reason) = match closest_episode(record, episodes) {
                Some((position, episode)) => {
                    claimed.insert((record.entity_id.clone(), record.date, position));
                    (
                        Some(episode.drained_volume),
                        vec![episode.clone()],
                        MatchReason::ClosestEpisode,
                    )
                }
                None => match raw_same_day_drain(series.get(&record.entity_id), record.date) {
                    Some(total) => (Some(total), Vec::new(), MatchReason::RawSeriesFallback),
                    None => (None, Vec::new(), MatchReason::NoDrainObserved),
                },
            };

            // Settled tickets still claim their episode so it is not reported
            // as unlogged activity, but they are not re-checked.
            if record.is_completed() || resolved.contains(&record.id) {
                continue;
            }

            let difference = calculated.map(|c| record.declared_amount - c);
            let suspicious = match difference {
                Some(diff) => self.is_discrepancy(diff, record.declared_amount),
                None => record.declared_amount > self.config.materiality_threshold,
            };

            if suspicious {
                debug!(
                    ticket_id = %record.id,
                    entity_id = %record.entity_id,
                    declared = record.declared_amount,
                    calculated = ?calculated,
                    "Suspicious ticket"
                );
            }

            report.matches.push(MatchResult {
                ticket_id: record.id.clone(),
                entity_id: record.entity_id.clone(),
                date: record.date,
                declared_amount: record.declared_amount,
                calculated_amount: calculated,
                difference,
                suspicious,
                matched_episodes: matched,
                reason,
            });
        }

        for (entity_id, by_day) in episodes {
            for (day, day_episodes) in by_day {
                for (position, episode) in day_episodes.iter().enumerate() {
                    if !claimed.contains(&(entity_id.clone(), *day, position)) {
                        report.unmatched_drains.push(UnmatchedDrain {
                            entity_id: entity_id.clone(),
                            day: *day,
                            episode: episode.clone(),
                        });
                    }
                }
            }
        }

        report
    }

    /// Both the absolute floor and the relative fraction must be exceeded.
    fn is_discrepancy(&self, difference: f64, declared: f64) -> bool {
        let abs = difference.abs();
        abs > self.config.suspicious_abs_floor
            && abs > self.config.suspicious_rel_fraction * declared.abs()
    }
}

/// Drop repeated ticket ids, keeping the first occurrence.
fn dedupe(records: &[TransportRecord]) -> Vec<&TransportRecord> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.id.as_str()))
        .collect()
}

/// The same-day episode whose volume is closest to the declared amount.
fn closest_episode<'a>(
    record: &TransportRecord,
    episodes: &'a EpisodeIndex,
) -> Option<(usize, &'a DrainEpisode)> {
    let candidates = episodes.get(&record.entity_id)?.get(&record.date)?;

    let mut best: Option<(usize, &DrainEpisode, f64)> = None;
    for (position, episode) in candidates.iter().enumerate() {
        let distance = (episode.drained_volume - record.declared_amount).abs();
        match best {
            Some((_, _, best_distance)) if distance >= best_distance => {}
            _ => best = Some((position, episode, distance)),
        }
    }
    best.map(|(position, episode, _)| (position, episode))
}

/// Sum of every decrease between consecutive samples starting on `day`.
///
/// Returns `None` when the series is missing or shows no drop that day.
fn raw_same_day_drain(series: Option<&Vec<Sample>>, day: NaiveDate) -> Option<f64> {
    let series = series?;
    let total: f64 = series
        .windows(2)
        .filter(|pair| pair[0].timestamp.date_naive() == day)
        .map(|pair| pair[0].level - pair[1].level)
        .filter(|drop| drop.is_finite() && *drop > 0.0)
        .sum();

    (total > 0.0).then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::group_by_day;
    use crate::types::{group_by_entity, EpisodesByDay};
    use chrono::{TimeZone, Utc};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, 8).unwrap()
    }

    fn episode(entity: &str, minute: i64, volume: f64) -> DrainEpisode {
        let start = Utc.with_ymd_and_hms(2024, 11, 8, 10, 0, 0).unwrap()
            + chrono::Duration::minutes(minute);
        DrainEpisode {
            entity_id: entity.to_string(),
            day: start.date_naive(),
            start_ts: start,
            end_ts: start + chrono::Duration::minutes(2),
            start_level: 100.0,
            end_level: 100.0 - volume,
            duration_min: 2.0,
            drained_volume: volume,
        }
    }

    fn ticket(id: &str, entity: &str, amount: f64) -> TransportRecord {
        TransportRecord {
            id: id.to_string(),
            entity_id: entity.to_string(),
            date: day(),
            declared_amount: amount,
            status: "pending".to_string(),
        }
    }

    fn index(episodes: Vec<DrainEpisode>) -> EpisodeIndex {
        let mut index = EpisodeIndex::new();
        let by_day: EpisodesByDay = group_by_day(episodes);
        index.insert("c1".to_string(), by_day);
        index
    }

    fn reconciler() -> TicketReconciler {
        TicketReconciler::new(ReconciliationConfig::default())
    }

    #[test]
    fn test_picks_closest_episode() {
        let idx = index(vec![episode("c1", 0, 30.0), episode("c1", 60, 80.0)]);
        let report = reconciler().reconcile(
            &[ticket("T1", "c1", 75.0)],
            &BTreeSet::new(),
            &idx,
            &SeriesByEntity::new(),
        );
        let m = &report.matches[0];
        assert_eq!(m.calculated_amount, Some(80.0));
        assert_eq!(m.difference, Some(-5.0));
        assert!(!m.suspicious);
        assert_eq!(m.reason, MatchReason::ClosestEpisode);
        // The 30-unit episode is unlogged activity
        assert_eq!(report.unmatched_drains.len(), 1);
        assert_eq!(report.unmatched_drains[0].episode.drained_volume, 30.0);
    }

    #[test]
    fn test_tie_goes_to_first_episode() {
        let idx = index(vec![episode("c1", 0, 40.0), episode("c1", 60, 60.0)]);
        let report = reconciler().reconcile(
            &[ticket("T1", "c1", 50.0)],
            &BTreeSet::new(),
            &idx,
            &SeriesByEntity::new(),
        );
        assert_eq!(report.matches[0].calculated_amount, Some(40.0));
    }

    #[test]
    fn test_suspicion_requires_both_thresholds() {
        let r = reconciler();
        // 60 off on 200 declared: above floor, below 50% → fine
        assert!(!r.is_discrepancy(60.0, 200.0));
        // 40 off on 50 declared: above 50%, below floor → fine
        assert!(!r.is_discrepancy(40.0, 50.0));
        // 70 off on 100 declared: both exceeded
        assert!(r.is_discrepancy(-70.0, 100.0));
    }

    #[test]
    fn test_untraceable_ticket_materiality() {
        let report = reconciler().reconcile(
            &[ticket("small", "c9", 80.0), ticket("big", "c9", 150.0)],
            &BTreeSet::new(),
            &EpisodeIndex::new(),
            &SeriesByEntity::new(),
        );
        assert_eq!(report.matches.len(), 2);
        assert!(!report.matches[0].suspicious);
        assert!(report.matches[1].suspicious);
        assert_eq!(report.matches[1].reason, MatchReason::NoDrainObserved);
        assert_eq!(report.matches[1].difference, None);
    }

    #[test]
    fn test_raw_series_fallback() {
        let base = Utc.with_ymd_and_hms(2024, 11, 8, 9, 0, 0).unwrap();
        let samples: Vec<Sample> = [50.0, 49.8, 49.9, 49.5]
            .iter()
            .enumerate()
            .map(|(i, &l)| Sample::new("c1", base + chrono::Duration::minutes(i as i64), l))
            .collect();
        let series = group_by_entity(&samples);
        let report = reconciler().reconcile(
            &[ticket("T1", "c1", 0.5)],
            &BTreeSet::new(),
            &EpisodeIndex::new(),
            &series,
        );
        let m = &report.matches[0];
        assert_eq!(m.reason, MatchReason::RawSeriesFallback);
        let calc = m.calculated_amount.expect("fallback amount");
        assert!((calc - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_resolved_and_completed_tickets_excluded_but_claim_episodes() {
        let idx = index(vec![episode("c1", 0, 30.0)]);
        let mut done = ticket("T-done", "c1", 30.0);
        done.status = "completed".to_string();
        let resolved: BTreeSet<String> = ["T-res".to_string()].into_iter().collect();
        let report = reconciler().reconcile(
            &[done, ticket("T-res", "c1", 30.0)],
            &resolved,
            &idx,
            &SeriesByEntity::new(),
        );
        assert!(report.matches.is_empty());
        assert!(report.unmatched_drains.is_empty());
    }

    #[test]
    fn test_duplicate_ticket_ids_collapse() {
        let idx = index(vec![episode("c1", 0, 30.0)]);
        let t = ticket("T1", "c1", 30.0);
        let report = reconciler().reconcile(
            &[t.clone(), t],
            &BTreeSet::new(),
            &idx,
            &SeriesByEntity::new(),
        );
        assert_eq!(report.matches.len(), 1);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let idx = index(vec![episode("c1", 0, 30.0), episode("c1", 90, 95.0)]);
        let records = vec![ticket("T1", "c1", 20.0), ticket("T2", "c1", 200.0)];
        let r = reconciler();
        let first = r.reconcile(&records, &BTreeSet::new(), &idx, &SeriesByEntity::new());
        let second = r.reconcile(&records, &BTreeSet::new(), &idx, &SeriesByEntity::new());
        assert_eq!(first, second);
        let a = serde_json::to_string(&first).expect("serializable");
        let b = serde_json::to_string(&second).expect("serializable");
        assert_eq!(a, b);
    }
}
