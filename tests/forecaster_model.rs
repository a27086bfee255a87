//! Forecaster persistence, reload and compatibility checks.

use chrono::{DateTime, Duration, TimeZone, Utc};

use rootsphere::config::{ForecasterConfig, RetrainConfig};
use rootsphere::error::EngineError;
use rootsphere::forecaster::{aggregate_daily, Forecaster, ModelStatus, RetrainPolicy, RetrainReason};
use rootsphere::types::{WeatherKind, WeatherObservation};

fn config(model_dir: &std::path::Path) -> ForecasterConfig {
    ForecasterConfig {
        min_training_days: 150,
        hidden_size: 8,
        epochs: 60,
        model_dir: model_dir.to_path_buf(),
        ..ForecasterConfig::default()
    }
}

/// Monsoon-like series: dry spells with a wet burst every eight days.
fn history(field: &str, days: i64) -> Vec<WeatherObservation> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..days)
        .flat_map(|i| {
            let day = start + Duration::days(i);
            let wet = i % 8 < 2;
            // Two readings per day exercise daily aggregation
            [6, 18].map(|hour| WeatherObservation {
                field_id: field.into(),
                timestamp: day + Duration::hours(hour),
                kind: WeatherKind::Historical,
                temperature: if wet { 24.0 } else { 31.0 },
                humidity: if wet { 88.0 } else { 52.0 },
                rainfall: if wet { 6.5 } else { 0.0 },
            })
        })
        .collect()
}

fn trained_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
}

#[test]
fn test_reloaded_artifact_reproduces_forecast() {
    let dir = tempfile::tempdir().unwrap();
    let obs = history("plot-1", 200);
    let reference = obs.last().unwrap().timestamp.date_naive();

    let first = Forecaster::new(config(dir.path()));
    first.train("plot-1", &obs, trained_at()).unwrap();
    let before = first.predict("plot-1", &obs, reference).unwrap();

    let second = Forecaster::new(config(dir.path()));
    let after = second.predict("plot-1", &obs, reference).unwrap();

    assert_eq!(before, after);
    assert!(matches!(second.status("plot-1").unwrap(), ModelStatus::Trained { version: 1, .. }));
}

#[test]
fn test_window_change_disables_stored_model() {
    let dir = tempfile::tempdir().unwrap();
    let obs = history("plot-1", 200);
    Forecaster::new(config(dir.path()))
        .train("plot-1", &obs, trained_at())
        .unwrap();

    let changed = Forecaster::new(ForecasterConfig {
        window_days: 21,
        ..config(dir.path())
    });
    let reference = obs.last().unwrap().timestamp.date_naive();
    assert!(matches!(
        changed.predict("plot-1", &obs, reference),
        Err(EngineError::ConfigMismatch(_))
    ));
    assert!(matches!(changed.status("plot-1").unwrap(), ModelStatus::Disabled { .. }));

    // Retraining under the new shape recovers the field
    let artifact = changed.train("plot-1", &obs, trained_at()).unwrap();
    assert_eq!(artifact.window_days, 21);
    assert!(changed.predict("plot-1", &obs, reference).is_ok());
}

#[test]
fn test_forecasts_are_never_negative() {
    let dir = tempfile::tempdir().unwrap();
    let obs = history("plot-1", 220);
    let f = Forecaster::new(config(dir.path()));
    f.train("plot-1", &obs, trained_at()).unwrap();

    for cut in (120..220).step_by(7) {
        let slice = &obs[..cut * 2];
        let reference = slice.last().unwrap().timestamp.date_naive();
        let v = f.predict("plot-1", slice, reference).unwrap();
        assert_eq!(v.horizon(), 3);
        assert!(v.values().iter().all(|mm| mm.is_finite() && *mm >= 0.0));
    }
}

#[test]
fn test_lagged_input_keeps_offsets_relative_to_reference() {
    let dir = tempfile::tempdir().unwrap();
    let obs = history("plot-1", 200);
    let f = Forecaster::new(config(dir.path()));
    f.train("plot-1", &obs, trained_at()).unwrap();

    let last_day = obs.last().unwrap().timestamp.date_naive();
    let aligned = f.predict("plot-1", &obs, last_day).unwrap();
    let lagged = f.predict("plot-1", &obs, last_day + Duration::days(2)).unwrap();

    // Same input window, so the third model day is tomorrow relative to the lagged reference
    assert_eq!(aligned.horizon(), 3);
    assert_eq!(lagged.horizon(), 1);
    assert_eq!(lagged.rainfall_on(1), aligned.rainfall_on(3));
    assert_eq!(lagged.rainfall_on(2), None);
    assert_eq!(lagged.model_version, Some(1));
}

#[test]
fn test_stale_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let obs = history("plot-1", 200);
    let f = Forecaster::new(config(dir.path()));
    f.train("plot-1", &obs, trained_at()).unwrap();

    let far_future = obs.last().unwrap().timestamp.date_naive() + Duration::days(30);
    assert!(matches!(
        f.predict("plot-1", &obs, far_future),
        Err(EngineError::InsufficientData(_))
    ));
}

#[test]
fn test_backtest_covers_every_offset() {
    let dir = tempfile::tempdir().unwrap();
    let obs = history("plot-1", 200);
    let f = Forecaster::new(config(dir.path()));
    f.train("plot-1", &obs, trained_at()).unwrap();

    let report = f.backtest("plot-1", &obs).unwrap();
    assert_eq!(report.model_version, 1);
    assert_eq!(report.offsets.len(), 3);
    assert!(report.windows > 100);
    assert!(report.overall_mae().is_finite());
}

#[test]
fn test_retrain_policy_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    let f = Forecaster::new(config(dir.path()));
    let policy = RetrainPolicy::from_config(&RetrainConfig::default(), 150);

    let obs = history("plot-1", 200);
    let days = aggregate_daily(&obs);
    let state = f.registry().state("plot-1").unwrap();
    assert_eq!(policy.evaluate(&state, &days, trained_at()), Some(RetrainReason::Initial));

    f.train("plot-1", &obs, trained_at()).unwrap();
    let state = f.registry().state("plot-1").unwrap();
    // No new days since training
    assert_eq!(policy.evaluate(&state, &days, trained_at() + Duration::days(3)), None);

    let longer = aggregate_daily(&history("plot-1", 235));
    assert!(matches!(
        policy.evaluate(&state, &longer, trained_at() + Duration::hours(1)),
        Some(RetrainReason::NewData { new_days: 35 })
    ));
}
