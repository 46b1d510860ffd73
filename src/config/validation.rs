//! Config validation: unknown-key detection with Levenshtein suggestions
//! and cross-section range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `OpsConfig`.
///
/// Maintained by hand to match the struct hierarchy in ops_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        "site",
        "site.name",
        "rates",
        "rates.refresh_interval_secs",
        "rates.max_interval_minutes",
        "rates.max_fill_rate",
        "rates.max_drain_rate",
        "segmentation",
        "segmentation.max_episode_minutes",
        "segmentation.max_episode_volume",
        "segmentation.noise_threshold",
        "segmentation.refill_tolerance",
        "segmentation.max_refill_steps",
        "segmentation.max_stable_steps",
        "segmentation.min_episode_volume",
        "reconciliation",
        "reconciliation.suspicious_abs_floor",
        "reconciliation.suspicious_rel_fraction",
        "reconciliation.materiality_threshold",
        "network",
        "network.depot_id",
        "network.travel_time_unit",
        "dispatch",
        "dispatch.unload_minutes",
        "dispatch.horizon_hours",
        "simulator",
        "simulator.min_drain_rate",
        "ingest",
        "ingest.fetch_timeout_secs",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
///
/// Ties resolve to the lexicographically smallest key so suggestions are stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are reported by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Cross-Section Range Validation
// ============================================================================

/// Checks that span more than one section.
///
/// Returns hard errors only; each entry prevents startup.
pub fn validate_ranges(config: &super::OpsConfig) -> Vec<String> {
    let mut errors = Vec::new();

    // A drain faster than the corruption clamp could never be estimated
    if config.simulator.min_drain_rate > config.rates.max_drain_rate {
        errors.push(format!(
            "simulator.min_drain_rate ({:.1}) exceeds rates.max_drain_rate ({:.1})",
            config.simulator.min_drain_rate, config.rates.max_drain_rate
        ));
    }

    // An episode may never outlive the staleness cut-off of the rate estimator
    if config.segmentation.max_episode_minutes > config.rates.max_interval_minutes {
        errors.push(format!(
            "segmentation.max_episode_minutes ({:.1}) exceeds rates.max_interval_minutes ({:.1})",
            config.segmentation.max_episode_minutes, config.rates.max_interval_minutes
        ));
    }

    if config.reconciliation.suspicious_abs_floor > config.reconciliation.materiality_threshold {
        errors.push(format!(
            "reconciliation.suspicious_abs_floor ({:.1}) must not exceed materiality_threshold ({:.1})",
            config.reconciliation.suspicious_abs_floor,
            config.reconciliation.materiality_threshold
        ));
    }

    errors
}
