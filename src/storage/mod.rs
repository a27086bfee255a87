//! Persistence layer - pluggable storage backend
//!
//! Abstracts field, observation, recommendation and feedback storage so the
//! pipeline never depends on a concrete database:
//! - `InMemoryStore`: thread-safe store for tests and demos
//! - `SledStore`: embedded sled database for deployments

mod memory;
mod sled_store;

pub use memory::InMemoryStore;
pub use sled_store::SledStore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{
    FeedbackRecord, FieldProfile, ImageMeta, Recommendation, SensorSample, WeatherKind,
    WeatherObservation,
};

/// Trait for pluggable persistence backends.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across worker tasks.
pub trait Persistence: Send + Sync {
    fn put_field(&self, profile: &FieldProfile) -> Result<(), StorageError>;

    fn get_field(&self, field_id: &str) -> Result<Option<FieldProfile>, StorageError>;

    fn list_fields(&self) -> Result<Vec<FieldProfile>, StorageError>;

    fn insert_sensor(&self, sample: &SensorSample) -> Result<(), StorageError>;

    /// Newest sample taken at or before `at` and no older than `since`.
    fn latest_sensor(
        &self,
        field_id: &str,
        since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<SensorSample>, StorageError>;

    fn insert_weather(&self, obs: &WeatherObservation) -> Result<(), StorageError>;

    /// Observations of `kind` with `from <= timestamp <= to`, oldest first.
    fn weather_range(
        &self,
        field_id: &str,
        kind: WeatherKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WeatherObservation>, StorageError>;

    fn insert_image(&self, image: &ImageMeta) -> Result<(), StorageError>;

    /// Newest image taken at or before `at` and no older than `since`.
    fn latest_image(
        &self,
        field_id: &str,
        since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<ImageMeta>, StorageError>;

    /// Store a finalised recommendation. Writing an existing id is rejected.
    fn put_recommendation(&self, rec: &Recommendation) -> Result<(), StorageError>;

    fn get_recommendation(&self, id: Uuid) -> Result<Option<Recommendation>, StorageError>;

    /// Recommendations for a field, newest first.
    fn list_recommendations(
        &self,
        field_id: &str,
        limit: usize,
    ) -> Result<Vec<Recommendation>, StorageError>;

    fn append_feedback(&self, record: &FeedbackRecord) -> Result<(), StorageError>;

    /// Feedback for one recommendation in submission order.
    fn feedback_for(&self, recommendation_id: Uuid) -> Result<Vec<FeedbackRecord>, StorageError>;

    fn all_feedback(&self) -> Result<Vec<FeedbackRecord>, StorageError>;

    /// Full historical weather series for training, oldest first.
    fn weather_history(&self, field_id: &str) -> Result<Vec<WeatherObservation>, StorageError> {
        self.weather_range(
            field_id,
            WeatherKind::Historical,
            DateTime::<Utc>::MIN_UTC,
            DateTime::<Utc>::MAX_UTC,
        )
    }

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("record already exists: {0}")]
    Duplicate(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
