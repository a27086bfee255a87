//! Config loading and validation tests.
//!
//! Exercise TOML parsing, range validation and unknown-key warnings
//! independently from the rest of the engine.

use rootsphere::config::validation::validate_unknown_keys;
use rootsphere::config::{ConfigError, EngineConfig, MissingForecastPolicy};
use rootsphere::rules::RuleEngine;
use rootsphere::types::{CropType, GrowthStage};

#[test]
fn empty_file_yields_defaults() {
    let config = EngineConfig::from_toml_str("").unwrap();
    assert_eq!(config.forecaster.window_days, 30);
    assert_eq!(config.forecaster.horizon_days, 3);
    assert_eq!(config.rules.missing_forecast_policy, MissingForecastPolicy::AssumeNoRain);
    assert!((config.divergence.absolute_tolerance_mm - 10.0).abs() < f64::EPSILON);
    assert!(config.validate().is_ok());
}

#[test]
fn partial_sections_keep_other_defaults() {
    let config = EngineConfig::from_toml_str(
        r#"
[forecaster]
window_days = 14
min_training_days = 365

[orchestrator]
workers = 2

[rules]
missing_forecast_policy = "skip_irrigation"
"#,
    )
    .unwrap();
    assert_eq!(config.forecaster.window_days, 14);
    assert_eq!(config.forecaster.horizon_days, 3);
    assert_eq!(config.orchestrator.workers, 2);
    assert_eq!(config.orchestrator.queue_capacity, 256);
    assert_eq!(config.rules.missing_forecast_policy, MissingForecastPolicy::SkipIrrigation);
}

#[test]
fn every_range_problem_is_reported() {
    let err = EngineConfig::from_toml_str(
        r#"
[aggregator.weights]
sensor = 0.9
weather = 0.4

[forecaster]
horizon_days = 0

[orchestrator]
workers = 0
"#,
    )
    .unwrap_err();
    let ConfigError::Validation(errors) = err else {
        panic!("expected validation error, got {err}");
    };
    assert!(errors.iter().any(|e| e.contains("aggregator.weights")));
    assert!(errors.iter().any(|e| e.contains("forecaster.horizon_days")));
    assert!(errors.iter().any(|e| e.contains("orchestrator.workers")));
}

#[test]
fn lookahead_cannot_exceed_horizon() {
    let err = EngineConfig::from_toml_str(
        r"
[forecaster]
horizon_days = 2

[rules]
irrigation_lookahead_days = 3
",
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Validation(ref errors) if errors.iter().any(|e| e.contains("irrigation_lookahead_days"))
    ));
}

#[test]
fn input_lag_must_leave_lookahead_covered() {
    let err = EngineConfig::from_toml_str(
        r"
[forecaster]
max_input_lag_days = 3
",
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Validation(ref errors) if errors.iter().any(|e| e.contains("max_input_lag_days"))
    ));

    let config = EngineConfig::from_toml_str(
        r"
[forecaster]
horizon_days = 5
max_input_lag_days = 3

[rules]
irrigation_lookahead_days = 2
",
    )
    .unwrap();
    assert_eq!(config.forecaster.max_input_lag_days, 3);
}

#[test]
fn rule_override_applies_to_one_entry() {
    let config = EngineConfig::from_toml_str(
        r#"
[[rules.overrides]]
crop = "maize"
stage = "flowering"
moisture_threshold_pct = 40.0
"#,
    )
    .unwrap();
    let engine = RuleEngine::from_config(&config.rules).unwrap();
    let overridden = engine.table().get(CropType::Maize, GrowthStage::Flowering);
    let untouched = engine.table().get(CropType::Maize, GrowthStage::Vegetative);
    assert!((overridden.moisture_threshold_pct - 40.0).abs() < f64::EPSILON);
    assert!((untouched.moisture_threshold_pct - 25.0).abs() < f64::EPSILON);
}

#[test]
fn inverted_ph_band_is_rejected() {
    let result = EngineConfig::from_toml_str(
        r#"
[[rules.overrides]]
crop = "rice"
stage = "vegetative"
ph_min = 7.5
ph_max = 6.0
"#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn typo_warns_but_still_loads() {
    let raw = r"
[divergence]
absolute_tolerence_mm = 8.0
";
    let warnings = validate_unknown_keys(raw);
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("divergence.absolute_tolerance_mm")
    );
    let config = EngineConfig::from_toml_str(raw).unwrap();
    assert!((config.divergence.absolute_tolerance_mm - 10.0).abs() < f64::EPSILON);
}

#[test]
fn round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rootsphere.toml");
    let mut config = EngineConfig::default();
    config.divergence.absolute_tolerance_mm = 12.5;
    config.save_to_file(&path).unwrap();

    let loaded = EngineConfig::load_from_file(&path).unwrap();
    assert!((loaded.divergence.absolute_tolerance_mm - 12.5).abs() < f64::EPSILON);
}
