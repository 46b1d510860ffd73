//! Drain Segmenter - discrete drain episodes from a noisy level series
//!
//! An episode opens on any strict decrease between consecutive samples and
//! keeps extending across:
//! - further strict decreases,
//! - up to `max_refill_steps` consecutive small rises (inflow while draining),
//! - up to `max_stable_steps` consecutive near-stable points.
//!
//! It closes when none of those hold, or when extending it would exceed
//! `max_episode_minutes` or `max_episode_volume`. The caps keep two
//! independent courier visits from merging into one episode.
//!
//! The drained volume compensates for inflow during the drain:
//! `(start_level - end_level) + fill_rate * duration_min`.

use tracing::debug;

use crate::config::SegmentationConfig;
use crate::types::{
    minutes_between, DrainEpisode, EpisodeIndex, EpisodesByDay, RateMap, Sample, SeriesByEntity,
};

/// How a step between two consecutive samples reads inside an open episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Decrease,
    Stable,
    SmallRise,
    Break,
}

/// Drain episode detector and segmenter
#[derive(Debug, Clone, Default)]
pub struct DrainSegmenter {
    config: SegmentationConfig,
}

impl DrainSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    /// Detect drain episodes in one entity's series.
    ///
    /// # Arguments
    /// * `series` - samples of a single entity, sorted by timestamp
    /// * `fill_rate` - the entity's current fill rate (units/min)
    ///
    /// # Returns
    /// Episodes in chronological order, noise-floor episodes removed
    pub fn segment(&self, series: &[Sample], fill_rate: f64) -> Vec<DrainEpisode> {
        let fill_rate = if fill_rate.is_finite() { fill_rate.max(0.0) } else { 0.0 };
        let mut episodes = Vec::new();
        let mut i = 1;

        while i < series.len() {
            if self.classify(series[i].level - series[i - 1].level) != Step::Decrease
                || self.spans_gap(&series[i - 1], &series[i])
            {
                i += 1;
                continue;
            }

            let start = i - 1;
            let end = self.extend(series, start, fill_rate);

            if let Some(episode) = self.close(series, start, end, fill_rate) {
                episodes.push(episode);
            }
            i = end + 1;
        }

        episodes
    }

    /// Segment every entity's series and group episodes by calendar day.
    pub fn segment_all(&self, series: &SeriesByEntity, rates: &RateMap) -> EpisodeIndex {
        let mut index = EpisodeIndex::new();
        for (entity_id, points) in series {
            let fill_rate = rates.get(entity_id).map_or(0.0, |r| r.fill_rate);
            let episodes = self.segment(points, fill_rate);
            debug!(entity_id = %entity_id, episodes = episodes.len(), "Segmented drain episodes");
            if !episodes.is_empty() {
                index.insert(entity_id.clone(), group_by_day(episodes));
            }
        }
        index
    }

    /// Walk forward from an opened episode and return the index of its last
    /// decreasing sample.
    fn extend(&self, series: &[Sample], start: usize, fill_rate: f64) -> usize {
        let cfg = &self.config;
        // The opening step is always part of the episode
        let mut end = start + 1;
        let mut rises = 0usize;
        let mut stables = 0usize;

        for j in (start + 2)..series.len() {
            let elapsed = minutes_between(series[start].timestamp, series[j].timestamp);
            if elapsed > cfg.max_episode_minutes {
                break;
            }

            match self.classify(series[j].level - series[j - 1].level) {
                Step::Decrease => {
                    let drained = series[start].level - series[j].level + fill_rate * elapsed;
                    if drained > cfg.max_episode_volume {
                        break;
                    }
                    end = j;
                    rises = 0;
                    stables = 0;
                }
                Step::Stable => {
                    stables += 1;
                    rises = 0;
                    if stables > cfg.max_stable_steps {
                        break;
                    }
                }
                Step::SmallRise => {
                    rises += 1;
                    stables = 0;
                    if rises > cfg.max_refill_steps {
                        break;
                    }
                }
                Step::Break => break,
            }
        }

        end
    }

    fn close(
        &self,
        series: &[Sample],
        start: usize,
        end: usize,
        fill_rate: f64,
    ) -> Option<DrainEpisode> {
        let first = &series[start];
        let last = &series[end];
        let duration_min = minutes_between(first.timestamp, last.timestamp).max(0.0);
        let drained_volume =
            ((first.level - last.level) + fill_rate * duration_min).max(0.0);

        if drained_volume < self.config.min_episode_volume {
            return None;
        }

        Some(DrainEpisode {
            entity_id: first.entity_id.clone(),
            day: first.timestamp.date_naive(),
            start_ts: first.timestamp,
            end_ts: last.timestamp,
            start_level: first.level,
            end_level: last.level,
            duration_min,
            drained_volume,
        })
    }

    /// A drop across a data gap longer than an episode may last cannot be
    /// attributed to a single drain.
    fn spans_gap(&self, a: &Sample, b: &Sample) -> bool {
        minutes_between(a.timestamp, b.timestamp) > self.config.max_episode_minutes
    }

    fn classify(&self, delta: f64) -> Step {
        if !delta.is_finite() {
            Step::Break
        } else if delta < 0.0 {
            Step::Decrease
        } else if delta <= self.config.noise_threshold {
            Step::Stable
        } else if delta <= self.config.refill_tolerance {
            Step::SmallRise
        } else {
            Step::Break
        }
    }
}

/// Group episodes by the calendar day of their start.
pub fn group_by_day(episodes: Vec<DrainEpisode>) -> EpisodesByDay {
    let mut by_day = EpisodesByDay::new();
    for episode in episodes {
        by_day.entry(episode.day).or_default().push(episode);
    }
    by_day
}
