//! Operations Configuration - every tunable threshold as a TOML value
//!
//! The reconciliation thresholds and the episode splitting caps were tuned
//! against a single demo dataset, so they live here instead of in code.
//! Each section implements `Default` with the documented values, so a
//! missing file behaves exactly like the built-in constants.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "CAULDRON_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "cauldron_ops.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a monitoring deployment.
///
/// Load with `OpsConfig::load()` which searches:
/// 1. `$CAULDRON_CONFIG` env var
/// 2. `./cauldron_ops.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpsConfig {
    /// Site identification
    #[serde(default)]
    pub site: SiteInfo,

    /// Rate estimator bounds and refresh cadence
    #[serde(default)]
    pub rates: RateConfig,

    /// Drain episode segmentation
    #[serde(default)]
    pub segmentation: SegmentationConfig,

    /// Ticket reconciliation thresholds
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,

    /// Travel graph interpretation
    #[serde(default)]
    pub network: NetworkConfig,

    /// Dispatch scheduler
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Drain simulator
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// Upstream fetch behaviour
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl OpsConfig {
    /// Load configuration using the standard search order:
    /// 1. `$CAULDRON_CONFIG` environment variable
    /// 2. `./cauldron_ops.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), site = %config.site.name, "Loaded config from CAULDRON_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from CAULDRON_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "CAULDRON_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(site = %config.site.name, "Loaded config from ./cauldron_ops.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./cauldron_ops.toml, using defaults");
                }
            }
        }

        info!("No cauldron_ops.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys only warn.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Write the config to disk as TOML.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }

    /// Check internal consistency. Collects every violation before failing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let r = &self.rates;
        Self::check_positive(r.max_interval_minutes, "rates.max_interval_minutes", &mut errors);
        Self::check_positive(r.max_fill_rate, "rates.max_fill_rate", &mut errors);
        Self::check_positive(r.max_drain_rate, "rates.max_drain_rate", &mut errors);
        if r.refresh_interval_secs == 0 {
            errors.push("rates.refresh_interval_secs must be > 0".to_string());
        }

        let s = &self.segmentation;
        Self::check_positive(s.max_episode_minutes, "segmentation.max_episode_minutes", &mut errors);
        Self::check_positive(s.max_episode_volume, "segmentation.max_episode_volume", &mut errors);
        Self::check_non_negative(s.noise_threshold, "segmentation.noise_threshold", &mut errors);
        Self::check_non_negative(s.min_episode_volume, "segmentation.min_episode_volume", &mut errors);
        if !s.refill_tolerance.is_finite() || s.refill_tolerance < s.noise_threshold {
            errors.push(format!(
                "segmentation.refill_tolerance ({:.3}) must be >= noise_threshold ({:.3})",
                s.refill_tolerance, s.noise_threshold
            ));
        }
        if s.min_episode_volume >= s.max_episode_volume {
            errors.push(format!(
                "segmentation.min_episode_volume ({:.1}) must be < max_episode_volume ({:.1})",
                s.min_episode_volume, s.max_episode_volume
            ));
        }

        let rc = &self.reconciliation;
        Self::check_non_negative(rc.suspicious_abs_floor, "reconciliation.suspicious_abs_floor", &mut errors);
        Self::check_non_negative(rc.materiality_threshold, "reconciliation.materiality_threshold", &mut errors);
        if !(0.0..=10.0).contains(&rc.suspicious_rel_fraction) {
            errors.push(format!(
                "reconciliation.suspicious_rel_fraction = {:.3} must be within 0-10",
                rc.suspicious_rel_fraction
            ));
        }

        if self.network.depot_id.trim().is_empty() {
            errors.push("network.depot_id must not be empty".to_string());
        }

        Self::check_non_negative(self.dispatch.unload_minutes, "dispatch.unload_minutes", &mut errors);
        Self::check_positive(self.dispatch.horizon_hours, "dispatch.horizon_hours", &mut errors);
        if self.dispatch.horizon_hours > defaults::MAX_DISPATCH_HORIZON_HOURS {
            errors.push(format!(
                "dispatch.horizon_hours = {:.1} exceeds the {:.0}h limit",
                self.dispatch.horizon_hours,
                defaults::MAX_DISPATCH_HORIZON_HOURS
            ));
        }

        Self::check_positive(self.simulator.min_drain_rate, "simulator.min_drain_rate", &mut errors);

        if self.ingest.fetch_timeout_secs == 0 {
            errors.push("ingest.fetch_timeout_secs must be > 0".to_string());
        }

        errors.extend(super::validation::validate_ranges(self));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: f64, name: &str, errors: &mut Vec<String>) {
        if !value.is_finite() || value <= 0.0 {
            errors.push(format!("{name} must be a finite number > 0 (got {value})"));
        }
    }

    fn check_non_negative(value: f64, name: &str, errors: &mut Vec<String>) {
        if !value.is_finite() || value < 0.0 {
            errors.push(format!("{name} must be a finite number >= 0 (got {value})"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Site Info
// ============================================================================

/// Identification metadata, used only in logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteInfo {
    #[serde(default = "default_site_name")]
    pub name: String,
}

fn default_site_name() -> String {
    "DEFAULT".to_string()
}

impl Default for SiteInfo {
    fn default() -> Self {
        Self {
            name: default_site_name(),
        }
    }
}

// ============================================================================
// Rate Estimator
// ============================================================================

/// Bounds for the robust rate estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateConfig {
    /// Background refresh period (seconds)
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Intervals longer than this are stale and ignored (minutes)
    #[serde(default = "default_max_interval_minutes")]
    pub max_interval_minutes: f64,

    /// Fill rates above this are treated as sensor corruption (units/min)
    #[serde(default = "default_max_fill_rate")]
    pub max_fill_rate: f64,

    /// Drain rates above this are treated as sensor corruption (units/min)
    #[serde(default = "default_max_drain_rate")]
    pub max_drain_rate: f64,
}

fn default_refresh_interval_secs() -> u64 {
    defaults::RATE_REFRESH_INTERVAL_SECS
}
fn default_max_interval_minutes() -> f64 {
    defaults::MAX_SAMPLE_INTERVAL_MINUTES
}
fn default_max_fill_rate() -> f64 {
    defaults::MAX_FILL_RATE
}
fn default_max_drain_rate() -> f64 {
    defaults::MAX_DRAIN_RATE
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            max_interval_minutes: default_max_interval_minutes(),
            max_fill_rate: default_max_fill_rate(),
            max_drain_rate: default_max_drain_rate(),
        }
    }
}

// ============================================================================
// Drain Segmentation
// ============================================================================

/// Episode detection parameters.
///
/// The duration and volume caps stop two separate courier visits from being
/// merged into one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Close an episode once it spans longer than this (minutes)
    #[serde(default = "default_max_episode_minutes")]
    pub max_episode_minutes: f64,

    /// Close an episode once its drained volume would exceed this (units)
    #[serde(default = "default_max_episode_volume")]
    pub max_episode_volume: f64,

    /// |Δ| at or below this counts as a near-stable point (units)
    #[serde(default = "default_noise_threshold")]
    pub noise_threshold: f64,

    /// Largest rise still tolerated inside an episode (units)
    #[serde(default = "default_refill_tolerance")]
    pub refill_tolerance: f64,

    /// Consecutive small rises tolerated inside an episode
    #[serde(default = "default_max_refill_steps")]
    pub max_refill_steps: usize,

    /// Consecutive near-stable points tolerated inside an episode
    #[serde(default = "default_max_stable_steps")]
    pub max_stable_steps: usize,

    /// Episodes draining less than this are noise (units)
    #[serde(default = "default_min_episode_volume")]
    pub min_episode_volume: f64,
}

fn default_max_episode_minutes() -> f64 {
    defaults::MAX_EPISODE_MINUTES
}
fn default_max_episode_volume() -> f64 {
    defaults::MAX_EPISODE_VOLUME
}
fn default_noise_threshold() -> f64 {
    defaults::LEVEL_NOISE_THRESHOLD
}
fn default_refill_tolerance() -> f64 {
    defaults::REFILL_TOLERANCE
}
fn default_max_refill_steps() -> usize {
    defaults::MAX_REFILL_STEPS
}
fn default_max_stable_steps() -> usize {
    defaults::MAX_STABLE_STEPS
}
fn default_min_episode_volume() -> f64 {
    defaults::MIN_EPISODE_VOLUME
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            max_episode_minutes: default_max_episode_minutes(),
            max_episode_volume: default_max_episode_volume(),
            noise_threshold: default_noise_threshold(),
            refill_tolerance: default_refill_tolerance(),
            max_refill_steps: default_max_refill_steps(),
            max_stable_steps: default_max_stable_steps(),
            min_episode_volume: default_min_episode_volume(),
        }
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Suspicion thresholds. A ticket is suspicious only when the discrepancy
/// exceeds BOTH the absolute floor and the relative fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Absolute discrepancy floor (units)
    #[serde(default = "default_suspicious_abs_floor")]
    pub suspicious_abs_floor: f64,

    /// Discrepancy as a fraction of the declared amount
    #[serde(default = "default_suspicious_rel_fraction")]
    pub suspicious_rel_fraction: f64,

    /// Untraceable tickets above this amount are suspicious (units)
    #[serde(default = "default_materiality_threshold")]
    pub materiality_threshold: f64,
}

fn default_suspicious_abs_floor() -> f64 {
    defaults::SUSPICIOUS_ABS_FLOOR
}
fn default_suspicious_rel_fraction() -> f64 {
    defaults::SUSPICIOUS_REL_FRACTION
}
fn default_materiality_threshold() -> f64 {
    defaults::MATERIALITY_THRESHOLD
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            suspicious_abs_floor: default_suspicious_abs_floor(),
            suspicious_rel_fraction: default_suspicious_rel_fraction(),
            materiality_threshold: default_materiality_threshold(),
        }
    }
}

// ============================================================================
// Network
// ============================================================================

/// Unit of the `travel_time` values delivered upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelTimeUnit {
    #[default]
    Minutes,
    Seconds,
}

impl TravelTimeUnit {
    /// Convert a raw travel time into seconds.
    pub fn to_seconds(self, value: f64) -> f64 {
        match self {
            TravelTimeUnit::Minutes => value * 60.0,
            TravelTimeUnit::Seconds => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Node id of the depot (market) every route starts and ends at
    #[serde(default = "default_depot_id")]
    pub depot_id: String,

    #[serde(default)]
    pub travel_time_unit: TravelTimeUnit,
}

fn default_depot_id() -> String {
    defaults::DEPOT_ID.to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            depot_id: default_depot_id(),
            travel_time_unit: TravelTimeUnit::default(),
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Unload time charged on every return to the depot (minutes)
    #[serde(default = "default_unload_minutes")]
    pub unload_minutes: f64,

    /// Only entities overflowing within this horizon are scheduled (hours)
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: f64,
}

fn default_unload_minutes() -> f64 {
    defaults::UNLOAD_MINUTES
}
fn default_horizon_hours() -> f64 {
    defaults::DISPATCH_HORIZON_HOURS
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            unload_minutes: default_unload_minutes(),
            horizon_hours: default_horizon_hours(),
        }
    }
}

// ============================================================================
// Simulator
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Floor for the simulated drain rate (units/min)
    #[serde(default = "default_min_drain_rate")]
    pub min_drain_rate: f64,
}

fn default_min_drain_rate() -> f64 {
    defaults::MIN_SIMULATED_DRAIN_RATE
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            min_drain_rate: default_min_drain_rate(),
        }
    }
}

// ============================================================================
// Ingest
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Upper bound on any upstream fetch (seconds)
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_fetch_timeout_secs() -> u64 {
    defaults::FETCH_TIMEOUT_SECS
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
