//! Ingestion boundary.
//!
//! Every payload is validated before it reaches storage. A malformed
//! reading is rejected with `ValidationError` listing all problems found;
//! nothing is clamped or silently dropped.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::EngineError;
use crate::storage::Persistence;
use crate::types::{FieldProfile, ImageMeta, SensorSample, WeatherKind, WeatherObservation};

/// Upper bound on free-text image notes.
const MAX_IMAGE_NOTES_CHARS: usize = 2_000;

/// Readings stamped further than this into the future are rejected.
const MAX_CLOCK_SKEW_MINUTES: i64 = 60;

/// Collects problems for one payload.
#[derive(Debug, Default)]
struct Problems(Vec<String>);

impl Problems {
    fn range(&mut self, name: &str, value: f64, min: f64, max: f64) {
        if !value.is_finite() || value < min || value > max {
            self.0.push(format!("{name} must be between {min} and {max} (got {value})"));
        }
    }

    fn non_negative(&mut self, name: &str, value: f64) {
        if !value.is_finite() || value < 0.0 {
            self.0.push(format!("{name} must be a non-negative number (got {value})"));
        }
    }

    fn not_future(&mut self, timestamp: DateTime<Utc>, now: DateTime<Utc>) {
        if timestamp > now + Duration::minutes(MAX_CLOCK_SKEW_MINUTES) {
            self.0.push(format!("timestamp {timestamp} is in the future"));
        }
    }

    fn field_matches(&mut self, payload_field: &str, field_id: &str) {
        if payload_field != field_id {
            self.0.push(format!(
                "payload field_id {payload_field:?} does not match {field_id:?}"
            ));
        }
    }

    fn into_result(self) -> Result<(), EngineError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ValidationError(self.0.join("; ")))
        }
    }
}

pub fn validate_field(profile: &FieldProfile) -> Result<(), EngineError> {
    let mut p = Problems::default();
    if profile.id.trim().is_empty() {
        p.0.push("field id must not be empty".to_string());
    }
    p.range("latitude", profile.latitude, -90.0, 90.0);
    p.range("longitude", profile.longitude, -180.0, 180.0);
    if !profile.area_acres.is_finite() || profile.area_acres <= 0.0 {
        p.0.push(format!("area_acres must be positive (got {})", profile.area_acres));
    }
    p.into_result()
}

pub fn validate_sensor(sample: &SensorSample, now: DateTime<Utc>) -> Result<(), EngineError> {
    let mut p = Problems::default();
    p.range("moisture", sample.moisture, 0.0, 100.0);
    p.range("ph", sample.ph, 0.0, 14.0);
    p.non_negative("nitrogen", sample.nitrogen);
    p.non_negative("phosphorus", sample.phosphorus);
    p.non_negative("potassium", sample.potassium);
    p.not_future(sample.timestamp, now);
    p.into_result()
}

pub fn validate_weather(obs: &WeatherObservation, now: DateTime<Utc>) -> Result<(), EngineError> {
    let mut p = Problems::default();
    p.range("temperature", obs.temperature, -60.0, 60.0);
    p.range("humidity", obs.humidity, 0.0, 100.0);
    p.non_negative("rainfall", obs.rainfall);
    if obs.kind == WeatherKind::Historical {
        p.not_future(obs.timestamp, now);
    }
    p.into_result()
}

pub fn validate_image(image: &ImageMeta, now: DateTime<Utc>) -> Result<(), EngineError> {
    let mut p = Problems::default();
    if image.uri.trim().is_empty() {
        p.0.push("uri must not be empty".to_string());
    }
    if image.notes.chars().count() > MAX_IMAGE_NOTES_CHARS {
        p.0.push(format!("notes must be at most {MAX_IMAGE_NOTES_CHARS} characters"));
    }
    p.not_future(image.timestamp, now);
    p.into_result()
}

/// Validating front door to the persistence layer.
pub struct Ingestor {
    store: Arc<dyn Persistence>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self { store }
    }

    /// Create or update a field.
    pub fn register_field(&self, profile: &FieldProfile) -> Result<(), EngineError> {
        validate_field(profile)?;
        self.store.put_field(profile)?;
        debug!(field_id = %profile.id, crop = %profile.crop, stage = %profile.stage, "Field registered");
        Ok(())
    }

    fn require_field(&self, field_id: &str) -> Result<(), EngineError> {
        match self.store.get_field(field_id)? {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(format!("field {field_id}"))),
        }
    }

    pub fn sensor(&self, field_id: &str, sample: &SensorSample) -> Result<(), EngineError> {
        self.require_field(field_id)?;
        let mut p = Problems::default();
        p.field_matches(&sample.field_id, field_id);
        p.into_result()?;
        validate_sensor(sample, Utc::now())?;
        self.store.insert_sensor(sample)?;
        debug!(field_id = %field_id, moisture = sample.moisture, "Sensor sample stored");
        Ok(())
    }

    /// Store a batch of observations. The whole batch is validated first
    /// and rejected if any entry is invalid.
    pub fn weather(&self, field_id: &str, batch: &[WeatherObservation]) -> Result<usize, EngineError> {
        self.require_field(field_id)?;
        let now = Utc::now();
        let errors: Vec<String> = batch
            .iter()
            .enumerate()
            .filter_map(|(i, obs)| {
                let mut p = Problems::default();
                p.field_matches(&obs.field_id, field_id);
                p.into_result()
                    .and_then(|()| validate_weather(obs, now))
                    .err()
                    .map(|e| format!("observation {i}: {e}"))
            })
            .collect();
        if !errors.is_empty() {
            return Err(EngineError::ValidationError(errors.join("; ")));
        }
        for obs in batch {
            self.store.insert_weather(obs)?;
        }
        debug!(field_id = %field_id, count = batch.len(), "Weather observations stored");
        Ok(batch.len())
    }

    pub fn image(&self, field_id: &str, image: &ImageMeta) -> Result<(), EngineError> {
        self.require_field(field_id)?;
        let mut p = Problems::default();
        p.field_matches(&image.field_id, field_id);
        p.into_result()?;
        validate_image(image, Utc::now())?;
        self.store.insert_image(image)?;
        debug!(field_id = %field_id, uri = %image.uri, "Image metadata stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::types::{CropType, GrowthStage, ImageSource};

    fn profile() -> FieldProfile {
        FieldProfile {
            id: "f1".into(),
            name: "North plot".into(),
            crop: CropType::Rice,
            stage: GrowthStage::Vegetative,
            latitude: 22.5,
            longitude: 88.3,
            area_acres: 2.0,
            registered_at: Utc::now(),
        }
    }

    fn sample() -> SensorSample {
        SensorSample {
            field_id: "f1".into(),
            timestamp: Utc::now(),
            moisture: 35.0,
            ph: 6.5,
            nitrogen: 25.0,
            phosphorus: 12.0,
            potassium: 15.0,
        }
    }

    fn ingestor() -> Ingestor {
        let ingestor = Ingestor::new(Arc::new(InMemoryStore::new()));
        ingestor.register_field(&profile()).unwrap();
        ingestor
    }

    #[test]
    fn test_valid_sensor_accepted() {
        assert!(ingestor().sensor("f1", &sample()).is_ok());
    }

    #[test]
    fn test_out_of_range_sensor_lists_every_problem() {
        let bad = SensorSample {
            moisture: 140.0,
            ph: -1.0,
            nitrogen: f64::NAN,
            ..sample()
        };
        let Err(EngineError::ValidationError(msg)) = ingestor().sensor("f1", &bad) else {
            panic!("expected validation error");
        };
        assert!(msg.contains("moisture"));
        assert!(msg.contains("ph"));
        assert!(msg.contains("nitrogen"));
    }

    #[test]
    fn test_unknown_field_is_not_found() {
        assert!(matches!(
            ingestor().sensor("nope", &SensorSample { field_id: "nope".into(), ..sample() }),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_weather_batch_is_all_or_nothing() {
        let ing = ingestor();
        let good = WeatherObservation {
            field_id: "f1".into(),
            timestamp: Utc::now() - Duration::hours(1),
            kind: WeatherKind::Historical,
            temperature: 28.0,
            humidity: 70.0,
            rainfall: 0.0,
        };
        let bad = WeatherObservation {
            humidity: 120.0,
            ..good.clone()
        };
        assert!(ing.weather("f1", &[good.clone(), bad]).is_err());
        assert!(ing.store.weather_history("f1").unwrap().is_empty());
        assert_eq!(ing.weather("f1", &[good]).unwrap(), 1);
    }

    #[test]
    fn test_future_forecast_points_allowed() {
        let obs = WeatherObservation {
            field_id: "f1".into(),
            timestamp: Utc::now() + Duration::days(2),
            kind: WeatherKind::Forecast,
            temperature: 30.0,
            humidity: 50.0,
            rainfall: 4.0,
        };
        assert!(validate_weather(&obs, Utc::now()).is_ok());
        let historical = WeatherObservation {
            kind: WeatherKind::Historical,
            ..obs
        };
        assert!(validate_weather(&historical, Utc::now()).is_err());
    }

    #[test]
    fn test_image_notes_are_bounded() {
        let image = ImageMeta {
            field_id: "f1".into(),
            timestamp: Utc::now(),
            uri: "s3://b/f1.jpg".into(),
            source: ImageSource::Phone,
            notes: "x".repeat(2_001),
        };
        assert!(validate_image(&image, Utc::now()).is_err());
    }

    #[test]
    fn test_image_requires_uri() {
        let image = ImageMeta {
            field_id: "f1".into(),
            timestamp: Utc::now(),
            uri: "  ".into(),
            source: ImageSource::Drone,
            notes: String::new(),
        };
        assert!(matches!(
            ingestor().image("f1", &image),
            Err(EngineError::ValidationError(_))
        ));
    }

    #[test]
    fn test_field_coordinates_validated() {
        let bad = FieldProfile {
            latitude: 95.0,
            ..profile()
        };
        assert!(validate_field(&bad).is_err());
    }
}
