//! External weather provider.
//!
//! The engine consumes two things from the provider: a short daily
//! forecast used for divergence checks, and a daily archive used to
//! backfill training history. [`OpenMeteoClient`] is the production
//! implementation; tests plug in their own [`WeatherProvider`].

mod cache;
mod open_meteo;

pub use cache::{CachedForecast, ForecastCache};
pub use open_meteo::OpenMeteoClient;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::EngineError;
use crate::types::{ExternalForecastDay, WeatherObservation};

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Daily forecast for day offsets `1..=horizon_days` after today.
    /// Failures are reported as `ForecastUnavailable`.
    async fn forecast(
        &self,
        latitude: f64,
        longitude: f64,
        horizon_days: u32,
    ) -> Result<Vec<ExternalForecastDay>, EngineError>;

    /// Daily historical observations for `start..=end`, one per day, tagged
    /// with `field_id`.
    async fn history(
        &self,
        field_id: &str,
        latitude: f64,
        longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherObservation>, EngineError>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}
