//! Config Validation Tests
//!
//! Typo detection, range validation and file loading for `OpsConfig`,
//! exercised independently from the rest of the pipeline.

use cauldron_ops::config::validation::{
    known_config_keys, suggest_correction, validate_ranges, validate_unknown_keys,
};
use cauldron_ops::config::{ConfigError, OpsConfig, TravelTimeUnit};

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_segmentation_key_warns_with_suggestion() {
    let toml_str = r#"
[segmentation]
max_episode_minutse = 12.0
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("max_episode_minutse"));
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("segmentation.max_episode_minutes")
    );
}

#[test]
fn typo_in_site_section_warns() {
    let warnings = validate_unknown_keys("[site]\nnaem = \"North Yard\"\n");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].suggestion.as_deref(), Some("site.name"));
    assert!(warnings[0].to_string().contains("did you mean 'site.name'"));
}

#[test]
fn misspelled_section_flags_section_and_children() {
    let warnings = validate_unknown_keys("[dispatc]\nunload_minutes = 10.0\n");
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().any(|w| w.suggestion.as_deref() == Some("dispatch")));
    assert!(warnings
        .iter()
        .any(|w| w.suggestion.as_deref() == Some("dispatch.unload_minutes")));
}

#[test]
fn valid_config_produces_zero_warnings() {
    let toml_str = r#"
[site]
name = "Potion Works"

[rates]
refresh_interval_secs = 30

[network]
depot_id = "market"
travel_time_unit = "seconds"

[reconciliation]
suspicious_abs_floor = 40.0
"#;
    assert!(validate_unknown_keys(toml_str).is_empty());
}

#[test]
fn wildly_wrong_key_has_no_suggestion() {
    let known = known_config_keys();
    assert!(suggest_correction("completely_unrelated_setting", &known).is_none());
}

#[test]
fn every_default_key_is_known() {
    let toml_str = OpsConfig::default().to_toml().expect("serialize defaults");
    assert!(
        validate_unknown_keys(&toml_str).is_empty(),
        "known_config_keys() is out of sync with OpsConfig"
    );
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn defaults_pass_range_checks() {
    assert!(validate_ranges(&OpsConfig::default()).is_empty());
}

#[test]
fn simulator_floor_above_drain_clamp_is_rejected() {
    let mut config = OpsConfig::default();
    config.simulator.min_drain_rate = 6000.0;
    let errors = validate_ranges(&config);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("min_drain_rate"));
}

#[test]
fn validation_collects_every_error() {
    let toml_str = r#"
[segmentation]
max_episode_minutes = -1.0

[dispatch]
horizon_hours = 0.0

[network]
depot_id = "  "
"#;
    match OpsConfig::from_toml_str(toml_str) {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors.len(), 3, "errors: {errors:?}");
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn unknown_travel_unit_is_a_parse_error() {
    let result = OpsConfig::from_toml_str("[network]\ntravel_time_unit = \"hours\"\n");
    assert!(matches!(result, Err(ConfigError::Parse(..))));
}

// ============================================================================
// File Loading
// ============================================================================

#[test]
fn load_and_save_roundtrip_through_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cauldron_ops.toml");

    let mut config = OpsConfig::default();
    config.site.name = "Roundtrip".to_string();
    config.network.travel_time_unit = TravelTimeUnit::Seconds;
    config.save_to_file(&path).expect("save");

    let loaded = OpsConfig::load_from_file(&path).expect("load");
    assert_eq!(loaded, config);
}

#[test]
fn missing_file_reports_io_error_with_path() {
    let err = OpsConfig::load_from_file(std::path::Path::new("/nonexistent/cauldron_ops.toml"))
        .expect_err("missing file");
    assert!(matches!(err, ConfigError::Io(..)));
    assert!(err.to_string().contains("/nonexistent/cauldron_ops.toml"));
}
