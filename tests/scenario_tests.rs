//! Scenario Tests
//!
//! End-to-end behaviour of the core components on small, hand-checked
//! datasets: segmentation, reconciliation, rate estimation, scheduling and
//! the drain simulator.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::BTreeSet;

use cauldron_ops::config::{
    DispatchConfig, RateConfig, ReconciliationConfig, SegmentationConfig, SimulatorConfig,
    TravelTimeUnit,
};
use cauldron_ops::types::{
    group_by_entity, DispatchStatus, EntityMeta, EntityRates, MatchReason, RateMap,
};
use cauldron_ops::{
    DispatchScheduler, DrainSegmenter, DrainSimulator, Entity, NetworkEdge, NetworkGraph,
    RateEstimator, Sample, Task, TicketReconciler, TransportRecord,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 8, 10, 0, 0).unwrap()
}

fn series(entity: &str, levels: &[f64], step_secs: i64) -> Vec<Sample> {
    levels
        .iter()
        .enumerate()
        .map(|(i, level)| Sample::new(entity, t0() + Duration::seconds(step_secs * i as i64), *level))
        .collect()
}

fn ticket(id: &str, entity: &str, amount: f64) -> TransportRecord {
    TransportRecord {
        id: id.to_string(),
        entity_id: entity.to_string(),
        date: NaiveDate::from_ymd_opt(2024, 11, 8).expect("date"),
        declared_amount: amount,
        status: "pending".to_string(),
    }
}

fn edge(from: &str, to: &str, minutes: f64) -> NetworkEdge {
    NetworkEdge {
        from: from.to_string(),
        to: to.to_string(),
        travel_time: minutes,
    }
}

// ============================================================================
// Segmentation + Reconciliation
// ============================================================================

#[test]
fn test_single_drain_matches_ticket_within_tolerance() {
    let samples = series("c1", &[80.0, 80.0, 55.0, 55.0], 60);
    let by_entity = group_by_entity(&samples);

    let rates = RateEstimator::new(RateConfig::default()).estimate(&samples).rates;
    assert_eq!(rates["c1"].fill_rate, 0.0);

    let episodes = DrainSegmenter::new(SegmentationConfig::default()).segment_all(&by_entity, &rates);
    let day = &episodes["c1"][&NaiveDate::from_ymd_opt(2024, 11, 8).expect("date")];
    assert_eq!(day.len(), 1);
    assert!((day[0].drained_volume - 25.0).abs() < 1e-9);

    let report = TicketReconciler::new(ReconciliationConfig::default()).reconcile(
        &[ticket("T1", "c1", 24.0)],
        &BTreeSet::new(),
        &episodes,
        &by_entity,
    );
    assert_eq!(report.matches.len(), 1);
    let m = &report.matches[0];
    assert_eq!(m.reason, MatchReason::ClosestEpisode);
    assert!((m.difference.expect("calculated") - (-1.0)).abs() < 1e-9);
    assert!(!m.suspicious);
    assert!(report.unmatched_drains.is_empty());
}

#[test]
fn test_drained_volume_is_independent_of_sample_density() {
    let segmenter = DrainSegmenter::new(SegmentationConfig::default());

    let coarse = segmenter.segment(&series("c1", &[100.0, 90.0, 80.0, 70.0], 60), 0.0);
    let fine_levels: Vec<f64> = (0..=12).map(|i| 100.0 - 2.5 * f64::from(i)).collect();
    let fine = segmenter.segment(&series("c1", &fine_levels, 15), 0.0);

    assert_eq!(coarse.len(), 1);
    assert_eq!(fine.len(), 1);
    assert!((coarse[0].drained_volume - 30.0).abs() < 1e-9);
    assert!((fine[0].drained_volume - coarse[0].drained_volume).abs() < 1e-9);
}

#[test]
fn test_inflated_ticket_is_suspicious_and_unlogged_drain_reported() {
    // Two separate drains on the same day, an hour apart
    let mut samples = series("c1", &[300.0, 240.0, 240.0], 60);
    samples.extend(
        [240.0, 240.0, 160.0, 160.0]
            .iter()
            .enumerate()
            .map(|(i, l)| Sample::new("c1", t0() + Duration::minutes(60 + i as i64), *l)),
    );
    let by_entity = group_by_entity(&samples);
    let episodes = DrainSegmenter::new(SegmentationConfig::default()).segment_all(&by_entity, &RateMap::new());

    let report = TicketReconciler::new(ReconciliationConfig::default()).reconcile(
        &[ticket("T-inflated", "c1", 200.0)],
        &BTreeSet::new(),
        &episodes,
        &by_entity,
    );

    let m = &report.matches[0];
    assert_eq!(m.calculated_amount, Some(80.0));
    assert!(m.suspicious, "120 over an 80 drain exceeds both thresholds");
    assert_eq!(report.unmatched_drains.len(), 1);
    assert!((report.unmatched_drains[0].episode.drained_volume - 60.0).abs() < 1e-9);
}

#[test]
fn test_reconciliation_is_byte_identical_across_runs() {
    let samples = series("c1", &[120.0, 100.0, 70.0, 70.0, 75.0, 40.0], 60);
    let by_entity = group_by_entity(&samples);
    let episodes = DrainSegmenter::new(SegmentationConfig::default()).segment_all(&by_entity, &RateMap::new());
    let records = vec![ticket("T1", "c1", 50.0), ticket("T2", "c2", 500.0), ticket("T1", "c1", 99.0)];
    let reconciler = TicketReconciler::new(ReconciliationConfig::default());

    let first = reconciler.reconcile(&records, &BTreeSet::new(), &episodes, &by_entity);
    let second = reconciler.reconcile(&records, &BTreeSet::new(), &episodes, &by_entity);
    assert_eq!(
        serde_json::to_string(&first).expect("serialize"),
        serde_json::to_string(&second).expect("serialize")
    );
}

// ============================================================================
// Rate Estimation
// ============================================================================

#[test]
fn test_monotone_series_have_one_sided_rates() {
    let estimator = RateEstimator::new(RateConfig::default());

    let rising = estimator
        .estimate_series(&series("c1", &[10.0, 12.0, 12.0, 15.0], 60))
        .expect("enough history");
    assert_eq!(rising.drain_rate, 0.0);
    assert!(rising.fill_rate > 0.0);

    let falling = estimator
        .estimate_series(&series("c1", &[15.0, 14.0, 14.0, 10.0], 60))
        .expect("enough history");
    assert_eq!(falling.fill_rate, 0.0);
    assert!(falling.drain_rate > 0.0);
}

// ============================================================================
// Dispatch Scheduling
// ============================================================================

fn star() -> NetworkGraph {
    NetworkGraph::from_edges(
        &[edge("market", "A", 2.0), edge("market", "B", 50.0)],
        TravelTimeUnit::Minutes,
    )
}

fn task(id: &str, minutes: i64) -> Task {
    Task {
        entity_id: id.to_string(),
        deadline: t0() + Duration::minutes(minutes),
    }
}

#[test]
fn test_loose_deadlines_share_one_courier() {
    let graph = star();
    let plan = DispatchScheduler::new(&graph, "market", &DispatchConfig::default())
        .plan(&[task("A", 5), task("B", 100)], t0());
    assert_eq!(plan.required_couriers, 1);
    assert_eq!(plan.routes.len(), 1);
    // A at 2, one unload, then the 50 minute leg: B at 2 + 15 + 50
    assert_eq!(plan.routes[0].arrivals[1], t0() + Duration::minutes(67));
}

#[test]
fn test_deadline_between_arrival_and_return_still_shares_courier() {
    let graph = star();
    let plan = DispatchScheduler::new(&graph, "market", &DispatchConfig::default())
        .plan(&[task("A", 5), task("B", 68)], t0());
    assert_eq!(plan.required_couriers, 1);
    assert_eq!(plan.routes[0].sequence, vec!["A".to_string(), "B".to_string()]);
}

#[test]
fn test_tight_deadline_puts_b_on_its_own_route() {
    let graph = star();
    let plan = DispatchScheduler::new(&graph, "market", &DispatchConfig::default())
        .plan(&[task("A", 5), task("B", 60)], t0());
    assert_eq!(plan.required_couriers, 2);
    assert!(plan.routes.iter().any(|r| r.sequence == vec!["B".to_string()]));
}

#[test]
fn test_past_deadline_is_impossible_and_never_in_a_feasible_route() {
    let graph = star();
    let plan = DispatchScheduler::new(&graph, "market", &DispatchConfig::default())
        .plan(&[task("A", 1), task("B", 100)], t0());

    assert_eq!(plan.impossible, vec!["A".to_string()]);
    for route in plan.routes.iter().filter(|r| !r.impossible) {
        assert!(!route.sequence.contains(&"A".to_string()));
    }
}

#[test]
fn test_pairwise_incompatible_tasks_need_one_courier_each() {
    let edges: Vec<NetworkEdge> = (0..5).map(|i| edge("market", &format!("c{i}"), 20.0)).collect();
    let graph = NetworkGraph::from_edges(&edges, TravelTimeUnit::Minutes);
    let tasks: Vec<Task> = (0..5).map(|i| task(&format!("c{i}"), 25)).collect();

    let plan = DispatchScheduler::new(&graph, "market", &DispatchConfig::default()).plan(&tasks, t0());
    assert_eq!(plan.required_couriers, 5);
    assert!(plan.impossible.is_empty());
}

// ============================================================================
// Drain Simulator
// ============================================================================

#[tokio::test]
async fn test_dispatch_on_draining_entity_keeps_original_start() {
    let sim = DrainSimulator::new(&SimulatorConfig::default());
    let entity = Entity::from_meta(EntityMeta {
        id: "c1".to_string(),
        name: "Crimson".to_string(),
        capacity: 1000.0,
        level: Some(400.0),
    })
    .expect("valid");
    let rates = EntityRates::new(1.0, 40.0);

    let first = sim.dispatch_at(&entity, rates.drain_rate, t0()).await;
    assert_eq!(first.status, DispatchStatus::Started);

    let second = sim.dispatch_at(&entity, rates.drain_rate, t0() + Duration::minutes(3)).await;
    assert!(second.already_draining);
    let progress = second.progress.expect("progress");
    assert_eq!(progress.started_at, t0());
    assert_eq!(progress.initial_level, 400.0);
    assert_eq!(progress.remaining_level, 280.0);
}
