//! Sled-backed persistence.
//!
//! One named tree per record kind. Time-series keys are
//! `field_id ++ 0x00 ++ order-preserving timestamp ++ sequence`, so a field's
//! records are contiguous and sorted by time. Values are JSON.

use std::path::Path;

use chrono::{DateTime, Utc};
use sled::{Db, Tree};
use tracing::info;
use uuid::Uuid;

use super::{Persistence, StorageError};
use crate::types::{
    FeedbackRecord, FieldProfile, ImageMeta, Recommendation, SensorSample, WeatherKind,
    WeatherObservation,
};

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    fields: Tree,
    sensors: Tree,
    weather_historical: Tree,
    weather_forecast: Tree,
    images: Tree,
    recommendations: Tree,
    recommendations_by_field: Tree,
    feedback: Tree,
}

impl SledStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Database(e.to_string()))?;
        }
        let db = sled::open(path)?;
        info!(path = %path.display(), "Opened sled store");
        Self::from_db(db)
    }

    /// Throwaway database removed on drop.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        Ok(Self {
            fields: db.open_tree("fields")?,
            sensors: db.open_tree("sensors")?,
            weather_historical: db.open_tree("weather_historical")?,
            weather_forecast: db.open_tree("weather_forecast")?,
            images: db.open_tree("images")?,
            recommendations: db.open_tree("recommendations")?,
            recommendations_by_field: db.open_tree("recommendations_by_field")?,
            feedback: db.open_tree("feedback")?,
            db,
        })
    }

    /// Flush dirty pages to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    const fn weather_tree(&self, kind: WeatherKind) -> &Tree {
        match kind {
            WeatherKind::Historical => &self.weather_historical,
            WeatherKind::Forecast => &self.weather_forecast,
        }
    }

    fn insert_series<T: serde::Serialize>(
        &self,
        tree: &Tree,
        field_id: &str,
        ts: DateTime<Utc>,
        value: &T,
    ) -> Result<(), StorageError> {
        let mut key = series_key(field_id, ts);
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        tree.insert(key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan_series<T: serde::de::DeserializeOwned>(
        tree: &Tree,
        field_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl DoubleEndedIterator<Item = Result<T, StorageError>> {
        let start = series_key(field_id, from);
        let mut end = series_key(field_id, to);
        end.extend_from_slice(&[0xFF; 8]);
        tree.range(start..=end).map(|item| {
            let (_, v) = item?;
            Ok(serde_json::from_slice(&v)?)
        })
    }

    fn latest_series<T: serde::de::DeserializeOwned>(
        tree: &Tree,
        field_id: &str,
        since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<T>, StorageError> {
        Self::scan_series(tree, field_id, since, at).next_back().transpose()
    }
}

/// Order-preserving encoding of a millisecond timestamp.
fn ts_key(ts: DateTime<Utc>) -> [u8; 8] {
    let bits = u64::from_be_bytes(ts.timestamp_millis().to_be_bytes()) ^ (1 << 63);
    bits.to_be_bytes()
}

fn field_prefix(field_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(field_id.len() + 17);
    key.extend_from_slice(field_id.as_bytes());
    key.push(0);
    key
}

fn series_key(field_id: &str, ts: DateTime<Utc>) -> Vec<u8> {
    let mut key = field_prefix(field_id);
    key.extend_from_slice(&ts_key(ts));
    key
}

impl Persistence for SledStore {
    fn put_field(&self, profile: &FieldProfile) -> Result<(), StorageError> {
        self.fields
            .insert(profile.id.as_bytes(), serde_json::to_vec(profile)?)?;
        Ok(())
    }

    fn get_field(&self, field_id: &str) -> Result<Option<FieldProfile>, StorageError> {
        self.fields
            .get(field_id.as_bytes())?
            .map(|v| serde_json::from_slice(&v).map_err(StorageError::from))
            .transpose()
    }

    fn list_fields(&self) -> Result<Vec<FieldProfile>, StorageError> {
        self.fields
            .iter()
            .map(|item| {
                let (_, v) = item?;
                Ok(serde_json::from_slice(&v)?)
            })
            .collect()
    }

    fn insert_sensor(&self, sample: &SensorSample) -> Result<(), StorageError> {
        self.insert_series(&self.sensors, &sample.field_id, sample.timestamp, sample)
    }

    fn latest_sensor(
        &self,
        field_id: &str,
        since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<SensorSample>, StorageError> {
        Self::latest_series(&self.sensors, field_id, since, at)
    }

    fn insert_weather(&self, obs: &WeatherObservation) -> Result<(), StorageError> {
        self.insert_series(self.weather_tree(obs.kind), &obs.field_id, obs.timestamp, obs)
    }

    fn weather_range(
        &self,
        field_id: &str,
        kind: WeatherKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WeatherObservation>, StorageError> {
        Self::scan_series(self.weather_tree(kind), field_id, from, to).collect()
    }

    fn insert_image(&self, image: &ImageMeta) -> Result<(), StorageError> {
        self.insert_series(&self.images, &image.field_id, image.timestamp, image)
    }

    fn latest_image(
        &self,
        field_id: &str,
        since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<ImageMeta>, StorageError> {
        Self::latest_series(&self.images, field_id, since, at)
    }

    fn put_recommendation(&self, rec: &Recommendation) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(rec)?;
        let swapped = self
            .recommendations
            .compare_and_swap(rec.id.as_bytes(), None as Option<&[u8]>, Some(bytes))?;
        if swapped.is_err() {
            return Err(StorageError::Duplicate(rec.id.to_string()));
        }

        let mut index_key = series_key(&rec.field_id, rec.completed_at);
        index_key.extend_from_slice(rec.id.as_bytes());
        self.recommendations_by_field
            .insert(index_key, rec.id.as_bytes().as_slice())?;
        Ok(())
    }

    fn get_recommendation(&self, id: Uuid) -> Result<Option<Recommendation>, StorageError> {
        self.recommendations
            .get(id.as_bytes())?
            .map(|v| serde_json::from_slice(&v).map_err(StorageError::from))
            .transpose()
    }

    fn list_recommendations(
        &self,
        field_id: &str,
        limit: usize,
    ) -> Result<Vec<Recommendation>, StorageError> {
        let mut out = Vec::new();
        for item in self.recommendations_by_field.scan_prefix(field_prefix(field_id)).rev() {
            if out.len() >= limit {
                break;
            }
            let (_, id_bytes) = item?;
            if let Some(v) = self.recommendations.get(&id_bytes)? {
                out.push(serde_json::from_slice(&v)?);
            }
        }
        Ok(out)
    }

    fn append_feedback(&self, record: &FeedbackRecord) -> Result<(), StorageError> {
        let mut key = record.recommendation_id.as_bytes().to_vec();
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        self.feedback.insert(key, serde_json::to_vec(record)?)?;
        Ok(())
    }

    fn feedback_for(&self, recommendation_id: Uuid) -> Result<Vec<FeedbackRecord>, StorageError> {
        self.feedback
            .scan_prefix(recommendation_id.as_bytes())
            .map(|item| {
                let (_, v) = item?;
                Ok(serde_json::from_slice(&v)?)
            })
            .collect()
    }

    fn all_feedback(&self) -> Result<Vec<FeedbackRecord>, StorageError> {
        let mut all: Vec<FeedbackRecord> = self
            .feedback
            .iter()
            .map(|item| {
                let (_, v) = item?;
                Ok::<_, StorageError>(serde_json::from_slice(&v)?)
            })
            .collect::<Result<_, _>>()?;
        all.sort_by_key(|f| f.submitted_at);
        Ok(all)
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn obs(day: u32, rainfall: f64) -> WeatherObservation {
        WeatherObservation {
            field_id: "plot-7".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 5, day, 12, 0, 0).unwrap(),
            kind: WeatherKind::Historical,
            temperature: 24.0,
            humidity: 70.0,
            rainfall,
        }
    }

    #[test]
    fn test_ts_key_orders_negative_and_positive() {
        let before_epoch = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
        let after_epoch = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(ts_key(before_epoch) < ts_key(after_epoch));
    }

    #[test]
    fn test_weather_range_is_ordered_and_bounded() {
        let store = SledStore::temporary().unwrap();
        for day in [9, 3, 5, 1] {
            store.insert_weather(&obs(day, f64::from(day))).unwrap();
        }
        let from = Utc.with_ymd_and_hms(2026, 5, 2, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 5, 6, 0, 0, 0).unwrap();
        let got = store.weather_range("plot-7", WeatherKind::Historical, from, to).unwrap();
        let rain: Vec<f64> = got.iter().map(|o| o.rainfall).collect();
        assert_eq!(rain, vec![3.0, 5.0]);
    }

    #[test]
    fn test_same_timestamp_does_not_overwrite() {
        let store = SledStore::temporary().unwrap();
        store.insert_weather(&obs(4, 1.0)).unwrap();
        store.insert_weather(&obs(4, 2.0)).unwrap();
        assert_eq!(store.weather_history("plot-7").unwrap().len(), 2);
    }

    #[test]
    fn test_field_prefix_isolation() {
        let store = SledStore::temporary().unwrap();
        store.insert_weather(&obs(4, 1.0)).unwrap();
        let mut other = obs(4, 9.0);
        other.field_id = "plot-70".into();
        store.insert_weather(&other).unwrap();
        assert_eq!(store.weather_history("plot-7").unwrap().len(), 1);
    }

    #[test]
    fn test_latest_sensor_window() {
        let store = SledStore::temporary().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap();
        for hours_ago in [30, 5, 2] {
            store
                .insert_sensor(&SensorSample {
                    field_id: "plot-7".into(),
                    timestamp: at - Duration::hours(hours_ago),
                    moisture: f64::from(u32::try_from(hours_ago).unwrap()),
                    ph: 6.8,
                    nitrogen: 30.0,
                    phosphorus: 15.0,
                    potassium: 15.0,
                })
                .unwrap();
        }
        let latest = store
            .latest_sensor("plot-7", at - Duration::hours(24), at)
            .unwrap()
            .unwrap();
        assert!((latest.moisture - 2.0).abs() < f64::EPSILON);
    }
}
