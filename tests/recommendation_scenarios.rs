//! End-to-end recommendation scenarios: ingest, trigger, wait, inspect.
//!
//! Each test runs the real worker pool over an in-memory store with either
//! the real (untrained) forecaster or a fixed-output predictor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};

use rootsphere::config::EngineConfig;
use rootsphere::error::EngineError;
use rootsphere::forecaster::{Forecaster, RainfallPredictor};
use rootsphere::ingest::Ingestor;
use rootsphere::orchestrator::{EngineBuilder, FetchOutcome, RecommendationEngine};
use rootsphere::storage::{InMemoryStore, Persistence};
use rootsphere::types::{
    ConfidenceLevel, CropType, ExternalForecastDay, ExternalForecastStatus, FieldProfile, ForecastSource,
    ForecastVector, GrowthStage, Recommendation, SensorSample, WeatherKind, WeatherObservation,
};
use rootsphere::weather::WeatherProvider;

const WAIT: Duration = Duration::from_secs(10);

/// Returns the same rainfall vector for every request.
struct FixedPredictor(Vec<f64>);

impl RainfallPredictor for FixedPredictor {
    fn predict(
        &self,
        _field_id: &str,
        _history: &[WeatherObservation],
        _reference: NaiveDate,
    ) -> Result<ForecastVector, EngineError> {
        Ok(ForecastVector::from_values(&self.0, Some(1)))
    }
}

/// External provider with a fixed daily rainfall series starting tomorrow.
struct FixedProvider(Vec<f64>);

#[async_trait]
impl WeatherProvider for FixedProvider {
    async fn forecast(&self, _lat: f64, _lon: f64, horizon_days: u32) -> Result<Vec<ExternalForecastDay>, EngineError> {
        let today = Utc::now().date_naive();
        Ok(self
            .0
            .iter()
            .zip(1u32..=horizon_days)
            .map(|(&rainfall_mm, day_offset)| ExternalForecastDay {
                day_offset,
                date: today + ChronoDuration::days(i64::from(day_offset)),
                rainfall_mm,
                temperature: Some(30.0),
                humidity: Some(60.0),
            })
            .collect())
    }

    async fn history(
        &self,
        _field_id: &str,
        _lat: f64,
        _lon: f64,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<WeatherObservation>, EngineError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

struct Harness {
    engine: RecommendationEngine,
    ingestor: Ingestor,
}

fn harness(predictor: Option<Arc<dyn RainfallPredictor>>, provider: Option<Arc<dyn WeatherProvider>>) -> Harness {
    let config = Arc::new(EngineConfig::default());
    let store: Arc<dyn Persistence> = Arc::new(InMemoryStore::new());
    let forecaster = Arc::new(Forecaster::in_memory(config.forecaster.clone()));

    let mut builder = EngineBuilder::new(Arc::clone(&config), Arc::clone(&store), forecaster);
    if let Some(p) = predictor {
        builder = builder.with_predictor(p);
    }
    if let Some(w) = provider {
        builder = builder.with_weather(w);
    }
    Harness {
        engine: builder.start().unwrap(),
        ingestor: Ingestor::new(store),
    }
}

fn register_wheat(ingestor: &Ingestor) {
    ingestor
        .register_field(&FieldProfile {
            id: "plot-7".into(),
            name: "East terrace".into(),
            crop: CropType::Wheat,
            stage: GrowthStage::Vegetative,
            latitude: 28.6,
            longitude: 77.2,
            area_acres: 2.0,
            registered_at: Utc::now(),
        })
        .unwrap();
}

fn add_sensor(ingestor: &Ingestor, moisture: f64) {
    ingestor
        .sensor(
            "plot-7",
            &SensorSample {
                field_id: "plot-7".into(),
                timestamp: Utc::now() - ChronoDuration::minutes(30),
                moisture,
                ph: 6.8,
                nitrogen: 45.0,
                phosphorus: 25.0,
                potassium: 18.0,
            },
        )
        .unwrap();
}

fn add_weather(ingestor: &Ingestor) {
    ingestor
        .weather(
            "plot-7",
            &[WeatherObservation {
                field_id: "plot-7".into(),
                timestamp: Utc::now() - ChronoDuration::hours(1),
                kind: WeatherKind::Historical,
                temperature: 31.0,
                humidity: 55.0,
                rainfall: 0.0,
            }],
        )
        .unwrap();
}

async fn run(h: &Harness) -> Recommendation {
    let ticket = h.engine.trigger("plot-7").unwrap();
    match h.engine.wait_for(ticket, WAIT).await.unwrap() {
        FetchOutcome::Complete(rec) => *rec,
        other => panic!("expected complete recommendation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dry_soil_and_low_rain_irrigates() {
    let h = harness(Some(Arc::new(FixedPredictor(vec![2.0, 0.0, 0.0]))), None);
    register_wheat(&h.ingestor);
    add_sensor(&h.ingestor, 22.0);
    add_weather(&h.ingestor);

    let rec = run(&h).await;

    assert_eq!(rec.action_plan.irrigate(), Some(true));
    assert!(rec.explanation.mentions("moisture below 30% and low expected rainfall"));
    assert_eq!(rec.forecast_source, ForecastSource::Model { version: 1 });
    let irrigation = rec.action_plan.irrigation.as_ref().unwrap();
    assert!((irrigation.expected_rain_mm - 2.0).abs() < 1e-9);
    assert!((irrigation.total_liters - 1000.0).abs() < 1e-9);
    assert!(!irrigation.rain_assumed);
}

#[tokio::test]
async fn test_missing_sensor_leaves_irrigation_undecided() {
    let h = harness(Some(Arc::new(FixedPredictor(vec![0.0, 0.0, 0.0]))), None);
    register_wheat(&h.ingestor);
    add_weather(&h.ingestor);

    let rec = run(&h).await;

    assert_eq!(rec.action_plan.irrigate(), None);
    assert!(rec.action_plan.fertilizer.is_none());
    assert!(rec.explanation.mentions("insufficient soil data"));
    assert!((rec.completeness.value - 0.4).abs() < 1e-9);
    assert_eq!(rec.confidence, ConfidenceLevel::Partial);
    assert!(rec.degradations.iter().any(|d| d.contains("soil sensor")));
}

#[tokio::test]
async fn test_forecast_disagreement_raises_one_alert() {
    let h = harness(
        Some(Arc::new(FixedPredictor(vec![0.0, 1.0, 0.0]))),
        Some(Arc::new(FixedProvider(vec![0.0, 15.0, 0.0]))),
    );
    register_wheat(&h.ingestor);
    add_sensor(&h.ingestor, 40.0);
    add_weather(&h.ingestor);

    let rec = run(&h).await;

    assert_eq!(rec.external_status, ExternalForecastStatus::Live);
    assert_eq!(rec.risk_alerts.len(), 1);
    let alert = &rec.risk_alerts[0];
    assert_eq!(alert.day_offset, 2);
    assert!((alert.absolute_diff_mm - 14.0).abs() < 1e-9);
    assert!(alert.message.contains("Day +2"));
}

#[tokio::test]
async fn test_untrained_model_falls_back_to_zero_rain() {
    let h = harness(None, None);
    register_wheat(&h.ingestor);
    add_sensor(&h.ingestor, 22.0);
    add_weather(&h.ingestor);

    let rec = run(&h).await;

    assert!(matches!(rec.forecast_source, ForecastSource::NotAvailable { .. }));
    assert!(rec.internal_forecast.is_none());
    assert_eq!(rec.action_plan.irrigate(), Some(true));
    assert!(rec.action_plan.irrigation.as_ref().unwrap().rain_assumed);
    assert!(rec.explanation.mentions("Assumption: 0 mm rainfall"));
    assert_eq!(rec.confidence, ConfidenceLevel::Partial);
    assert!(rec
        .degradations
        .iter()
        .any(|d| d.contains("internal rainfall forecast unavailable")));
}

#[tokio::test]
async fn test_empty_snapshot_still_completes() {
    let h = harness(None, None);
    register_wheat(&h.ingestor);

    let rec = run(&h).await;

    assert!(rec.completeness.value.abs() < f64::EPSILON);
    assert_eq!(rec.action_plan.irrigate(), None);
    assert!(!rec.explanation.is_empty());
}
