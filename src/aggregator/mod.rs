//! Snapshot Aggregator
//!
//! Builds a [`FieldState`] from the newest reading of each modality. A
//! modality whose newest record is older than its staleness window is left
//! out; nothing is ever filled in with placeholder values.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::AggregatorConfig;
use crate::error::EngineError;
use crate::storage::Persistence;
use crate::types::{
    CompletenessScore, FieldState, Modality, WeatherKind, WeatherSnapshot,
};

/// Forecast points are read this far past the reference time.
const FORECAST_LOOKAHEAD_DAYS: i64 = 16;

pub struct SnapshotAggregator {
    store: Arc<dyn Persistence>,
    config: AggregatorConfig,
}

impl SnapshotAggregator {
    pub fn new(store: Arc<dyn Persistence>, config: AggregatorConfig) -> Self {
        Self { store, config }
    }

    /// Snapshot of `field_id` as of `at`. Fails only for an unknown field or
    /// a storage fault; missing data yields an emptier state.
    pub fn build(&self, field_id: &str, at: DateTime<Utc>) -> Result<FieldState, EngineError> {
        let profile = self
            .store
            .get_field(field_id)?
            .ok_or_else(|| EngineError::NotFound(format!("field {field_id}")))?;

        let sensor = self
            .store
            .latest_sensor(field_id, at - hours(self.config.sensor_max_age_hours), at)?;

        let weather = self.weather_snapshot(field_id, at)?;

        let image = self
            .store
            .latest_image(field_id, at - hours(self.config.image_max_age_hours), at)?;

        let mut present = Vec::with_capacity(3);
        if sensor.is_some() {
            present.push(Modality::Sensor);
        }
        if weather.is_some() {
            present.push(Modality::Weather);
        }
        if image.is_some() {
            present.push(Modality::Image);
        }
        let completeness = CompletenessScore::compute(&present, &self.config.weights);

        debug!(
            field_id = %field_id,
            completeness = completeness.value,
            present = ?completeness.present,
            "Snapshot built"
        );

        Ok(FieldState {
            profile,
            reference_time: at,
            sensor,
            weather,
            image,
            completeness,
        })
    }

    fn weather_snapshot(
        &self,
        field_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<WeatherSnapshot>, EngineError> {
        let history_start = at - Duration::days(i64::from(self.config.weather_history_days));
        let history = self
            .store
            .weather_range(field_id, WeatherKind::Historical, history_start, at)?;

        let fresh_after = at - hours(self.config.weather_max_age_hours);
        let is_fresh = history.last().is_some_and(|o| o.timestamp >= fresh_after);
        if !is_fresh {
            return Ok(None);
        }

        let forecast = self
            .store
            .weather_range(
                field_id,
                WeatherKind::Forecast,
                at,
                at + Duration::days(FORECAST_LOOKAHEAD_DAYS),
            )?
            .into_iter()
            .filter(|o| o.timestamp > at)
            .collect();

        Ok(Some(WeatherSnapshot { history, forecast }))
    }
}

fn hours(h: u64) -> Duration {
    Duration::hours(i64::try_from(h).unwrap_or(i64::MAX / 3_600_000))
}
