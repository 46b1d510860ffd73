//! Overflow forecasting: current level + fill rate → deadline
//!
//! A linear projection: `time_to_full = (capacity - level) / fill_rate`.
//! Entities that are not filling never overflow and produce no task, and
//! neither do entities whose projection falls outside the representable
//! time range.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::types::{Entity, EntityRates, Forecast, RateMap, Task};

/// Forecast a single entity.
pub fn forecast_entity(entity: &Entity, rates: EntityRates, now: DateTime<Utc>) -> Forecast {
    let time_to_full_minutes = minutes_to_full(entity.level, entity.capacity, rates.fill_rate);
    Forecast {
        entity_id: entity.id.clone(),
        name: entity.name.clone(),
        current_level: entity.level,
        capacity: entity.capacity,
        fill_rate_per_min: rates.fill_rate,
        time_to_full_minutes,
        overflow_at: time_to_full_minutes.and_then(|m| after_minutes(now, m)),
    }
}

/// Forecast every entity, soonest overflow first; non-filling entities last.
pub fn forecast_all<'a>(
    entities: impl IntoIterator<Item = &'a Entity>,
    rates: &RateMap,
    now: DateTime<Utc>,
) -> Vec<Forecast> {
    let mut forecasts: Vec<Forecast> = entities
        .into_iter()
        .map(|e| forecast_entity(e, rates.get(&e.id).copied().unwrap_or_default(), now))
        .collect();

    forecasts.sort_by(|a, b| {
        match (a.time_to_full_minutes, b.time_to_full_minutes) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
        .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    forecasts
}

/// Turn forecasts into scheduling tasks.
///
/// Entities in `excluded` (currently draining) and entities overflowing
/// beyond `horizon` are left out.
pub fn tasks_from_forecasts(
    forecasts: &[Forecast],
    horizon: Duration,
    excluded: &HashSet<String>,
    now: DateTime<Utc>,
) -> Vec<Task> {
    let cutoff = now.checked_add_signed(horizon);
    forecasts
        .iter()
        .filter(|f| !excluded.contains(&f.entity_id))
        .filter_map(|f| {
            let deadline = f.overflow_at?;
            cutoff.map_or(true, |c| deadline <= c).then(|| Task {
                entity_id: f.entity_id.clone(),
                deadline,
            })
        })
        .collect()
}

/// Minutes until `level` reaches `capacity` at `fill_rate`.
pub fn minutes_to_full(level: f64, capacity: f64, fill_rate: f64) -> Option<f64> {
    if level >= capacity {
        Some(0.0)
    } else if fill_rate > 0.0 && fill_rate.is_finite() {
        Some((capacity - level) / fill_rate)
    } else {
        None
    }
}

/// Fractional minutes as a chrono duration (millisecond precision).
///
/// `None` when the value is not finite or does not fit a duration.
pub fn minutes(value: f64) -> Option<Duration> {
    let millis = (value * 60_000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(millis as i64)
}

/// `start` shifted by fractional minutes, `None` past the representable range.
pub fn after_minutes(start: DateTime<Utc>, value: f64) -> Option<DateTime<Utc>> {
    minutes(value).and_then(|d| start.checked_add_signed(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityMeta;
    use chrono::TimeZone;

    fn entity(id: &str, level: f64) -> Entity {
        Entity::from_meta(EntityMeta {
            id: id.to_string(),
            name: id.to_uppercase(),
            capacity: 100.0,
            level: Some(level),
        })
        .expect("valid entity")
    }

    #[test]
    fn test_minutes_to_full() {
        assert_eq!(minutes_to_full(40.0, 100.0, 2.0), Some(30.0));
        assert_eq!(minutes_to_full(100.0, 100.0, 0.0), Some(0.0));
        assert_eq!(minutes_to_full(40.0, 100.0, 0.0), None);
    }

    #[test]
    fn test_forecast_sorting_and_tasks() {
        let now = Utc.with_ymd_and_hms(2024, 11, 8, 12, 0, 0).unwrap();
        let entities = vec![entity("slow", 10.0), entity("fast", 90.0), entity("idle", 50.0)];
        let mut rates = RateMap::new();
        rates.insert("slow".to_string(), EntityRates::new(0.01, 0.0));
        rates.insert("fast".to_string(), EntityRates::new(1.0, 0.0));

        let forecasts = forecast_all(&entities, &rates, now);
        let order: Vec<&str> = forecasts.iter().map(|f| f.entity_id.as_str()).collect();
        assert_eq!(order, vec!["fast", "slow", "idle"]);
        assert_eq!(forecasts[0].overflow_at, Some(now + Duration::minutes(10)));

        // "slow" overflows after 150 hours, outside a 24h horizon
        let tasks = tasks_from_forecasts(&forecasts, Duration::hours(24), &HashSet::new(), now);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].entity_id, "fast");

        let excluded: HashSet<String> = ["fast".to_string()].into_iter().collect();
        assert!(tasks_from_forecasts(&forecasts, Duration::hours(24), &excluded, now).is_empty());
    }

    #[test]
    fn test_negligible_fill_rate_never_overflows() {
        let now = Utc.with_ymd_and_hms(2024, 11, 8, 12, 0, 0).unwrap();
        let forecast = forecast_entity(&entity("c1", 50.0), EntityRates::new(1e-12, 0.0), now);

        assert!(forecast.time_to_full_minutes.is_some());
        assert_eq!(forecast.overflow_at, None);
        let tasks = tasks_from_forecasts(&[forecast], Duration::hours(24), &HashSet::new(), now);
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_minutes_out_of_range() {
        assert_eq!(minutes(1.5), Some(Duration::milliseconds(90_000)));
        assert_eq!(minutes(f64::NAN), None);
        assert_eq!(minutes(f64::INFINITY), None);
        assert_eq!(minutes(1e20), None);
        let now = Utc.with_ymd_and_hms(2024, 11, 8, 12, 0, 0).unwrap();
        assert_eq!(after_minutes(now, 5e13), None);
    }
}
