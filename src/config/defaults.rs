//! System-wide default constants.
//!
//! Every value here is the built-in default of a field in `OpsConfig`.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Rate Estimator
// ============================================================================

/// Background rate refresh period (seconds).
pub const RATE_REFRESH_INTERVAL_SECS: u64 = 60;

/// Sample intervals longer than a day are stale or corrupt (minutes).
pub const MAX_SAMPLE_INTERVAL_MINUTES: f64 = 1_440.0;

/// Upper bound for a plausible fill rate (units/min).
pub const MAX_FILL_RATE: f64 = 1_000.0;

/// Upper bound for a plausible drain rate (units/min).
pub const MAX_DRAIN_RATE: f64 = 5_000.0;

// ============================================================================
// Drain Segmentation
// ============================================================================

/// Maximum span of a single drain episode (minutes).
pub const MAX_EPISODE_MINUTES: f64 = 10.0;

/// Maximum volume of a single drain episode (units).
pub const MAX_EPISODE_VOLUME: f64 = 110.0;

/// Level changes at or below this are sensor noise (units).
pub const LEVEL_NOISE_THRESHOLD: f64 = 0.5;

/// Largest rise tolerated inside an open episode (units).
pub const REFILL_TOLERANCE: f64 = 3.0;

/// Consecutive small rises tolerated inside an open episode.
pub const MAX_REFILL_STEPS: usize = 2;

/// Consecutive near-stable points tolerated inside an open episode.
pub const MAX_STABLE_STEPS: usize = 3;

/// Episodes below this drained volume are discarded (units).
pub const MIN_EPISODE_VOLUME: f64 = 1.0;

// ============================================================================
// Reconciliation
// ============================================================================

/// Absolute discrepancy a suspicious ticket must exceed (units).
pub const SUSPICIOUS_ABS_FLOOR: f64 = 50.0;

/// Relative discrepancy a suspicious ticket must exceed (fraction of declared).
pub const SUSPICIOUS_REL_FRACTION: f64 = 0.5;

/// Untraceable tickets above this are suspicious (units).
pub const MATERIALITY_THRESHOLD: f64 = 100.0;

// ============================================================================
// Network / Dispatch
// ============================================================================

/// Depot node id.
pub const DEPOT_ID: &str = "market";

/// Unload time per depot visit (minutes).
pub const UNLOAD_MINUTES: f64 = 15.0;

/// Scheduling horizon (hours).
pub const DISPATCH_HORIZON_HOURS: f64 = 24.0;

/// Longest accepted scheduling horizon, one year (hours).
pub const MAX_DISPATCH_HORIZON_HOURS: f64 = 8_760.0;

// ============================================================================
// Simulator / Ingest
// ============================================================================

/// Minimum simulated drain rate during a dispatch (units/min).
pub const MIN_SIMULATED_DRAIN_RATE: f64 = 10.0;

/// Upstream fetch timeout (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 10;
