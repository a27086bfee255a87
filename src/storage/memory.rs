//! In-memory persistence for tests and demos.
//!
//! Thread-safe via `RwLock`. Not durable, data is lost on restart.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Persistence, StorageError};
use crate::types::{
    FeedbackRecord, FieldId, FieldProfile, ImageMeta, Recommendation, SensorSample, WeatherKind,
    WeatherObservation,
};

#[derive(Default)]
struct Tables {
    fields: HashMap<FieldId, FieldProfile>,
    sensors: HashMap<FieldId, Vec<SensorSample>>,
    weather: HashMap<FieldId, Vec<WeatherObservation>>,
    images: HashMap<FieldId, Vec<ImageMeta>>,
    recommendations: HashMap<Uuid, Recommendation>,
    feedback: Vec<FeedbackRecord>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StorageError> {
        self.tables
            .read()
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StorageError> {
        self.tables
            .write()
            .map_err(|e| StorageError::Database(e.to_string()))
    }
}

/// Newest item with `since <= ts <= at`.
fn latest_in<T: Clone>(
    items: Option<&Vec<T>>,
    ts: impl Fn(&T) -> DateTime<Utc>,
    since: DateTime<Utc>,
    at: DateTime<Utc>,
) -> Option<T> {
    items?
        .iter()
        .filter(|i| ts(*i) >= since && ts(*i) <= at)
        .max_by_key(|i| ts(*i))
        .cloned()
}

impl Persistence for InMemoryStore {
    fn put_field(&self, profile: &FieldProfile) -> Result<(), StorageError> {
        self.write()?.fields.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    fn get_field(&self, field_id: &str) -> Result<Option<FieldProfile>, StorageError> {
        Ok(self.read()?.fields.get(field_id).cloned())
    }

    fn list_fields(&self) -> Result<Vec<FieldProfile>, StorageError> {
        let mut fields: Vec<_> = self.read()?.fields.values().cloned().collect();
        fields.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(fields)
    }

    fn insert_sensor(&self, sample: &SensorSample) -> Result<(), StorageError> {
        self.write()?
            .sensors
            .entry(sample.field_id.clone())
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    fn latest_sensor(
        &self,
        field_id: &str,
        since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<SensorSample>, StorageError> {
        let tables = self.read()?;
        Ok(latest_in(tables.sensors.get(field_id), |s| s.timestamp, since, at))
    }

    fn insert_weather(&self, obs: &WeatherObservation) -> Result<(), StorageError> {
        self.write()?
            .weather
            .entry(obs.field_id.clone())
            .or_default()
            .push(obs.clone());
        Ok(())
    }

    fn weather_range(
        &self,
        field_id: &str,
        kind: WeatherKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WeatherObservation>, StorageError> {
        let tables = self.read()?;
        let mut out: Vec<WeatherObservation> = tables
            .weather
            .get(field_id)
            .map(|all| {
                all.iter()
                    .filter(|o| o.kind == kind && o.timestamp >= from && o.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|o| o.timestamp);
        Ok(out)
    }

    fn insert_image(&self, image: &ImageMeta) -> Result<(), StorageError> {
        self.write()?
            .images
            .entry(image.field_id.clone())
            .or_default()
            .push(image.clone());
        Ok(())
    }

    fn latest_image(
        &self,
        field_id: &str,
        since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<ImageMeta>, StorageError> {
        let tables = self.read()?;
        Ok(latest_in(tables.images.get(field_id), |i| i.timestamp, since, at))
    }

    fn put_recommendation(&self, rec: &Recommendation) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        if tables.recommendations.contains_key(&rec.id) {
            return Err(StorageError::Duplicate(rec.id.to_string()));
        }
        tables.recommendations.insert(rec.id, rec.clone());
        Ok(())
    }

    fn get_recommendation(&self, id: Uuid) -> Result<Option<Recommendation>, StorageError> {
        Ok(self.read()?.recommendations.get(&id).cloned())
    }

    fn list_recommendations(
        &self,
        field_id: &str,
        limit: usize,
    ) -> Result<Vec<Recommendation>, StorageError> {
        let tables = self.read()?;
        let mut recs: Vec<Recommendation> = tables
            .recommendations
            .values()
            .filter(|r| r.field_id == field_id)
            .cloned()
            .collect();
        recs.sort_by(|a, b| {
            b.completed_at
                .cmp(&a.completed_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        recs.truncate(limit);
        Ok(recs)
    }

    fn append_feedback(&self, record: &FeedbackRecord) -> Result<(), StorageError> {
        self.write()?.feedback.push(record.clone());
        Ok(())
    }

    fn feedback_for(&self, recommendation_id: Uuid) -> Result<Vec<FeedbackRecord>, StorageError> {
        Ok(self
            .read()?
            .feedback
            .iter()
            .filter(|f| f.recommendation_id == recommendation_id)
            .cloned()
            .collect())
    }

    fn all_feedback(&self) -> Result<Vec<FeedbackRecord>, StorageError> {
        Ok(self.read()?.feedback.clone())
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}
