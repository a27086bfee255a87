//! Open-Meteo client (forecast and archive APIs, daily resolution).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::{debug, warn};

use super::WeatherProvider;
use crate::config::WeatherConfig;
use crate::error::EngineError;
use crate::types::{ExternalForecastDay, WeatherKind, WeatherObservation};

const DAILY_VARIABLES: &str = "precipitation_sum,temperature_2m_mean,relative_humidity_2m_mean";

#[derive(Debug, Deserialize)]
struct DailyResponse {
    daily: DailyBlock,
}

#[derive(Debug, Default, Deserialize)]
struct DailyBlock {
    time: Vec<NaiveDate>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m_mean: Vec<Option<f64>>,
}

impl DailyBlock {
    fn value(series: &[Option<f64>], i: usize) -> Option<f64> {
        series.get(i).copied().flatten().filter(|v| v.is_finite())
    }

    /// Forecast days after the first (today) entry, up to `horizon`. Days
    /// without a precipitation value are dropped.
    fn into_forecast(self, horizon: u32) -> Vec<ExternalForecastDay> {
        let Some(&today) = self.time.first() else {
            return Vec::new();
        };
        self.time
            .iter()
            .enumerate()
            .filter_map(|(i, &date)| {
                let offset = u32::try_from((date - today).num_days()).ok()?;
                if offset == 0 || offset > horizon {
                    return None;
                }
                Some(ExternalForecastDay {
                    day_offset: offset,
                    date,
                    rainfall_mm: Self::value(&self.precipitation_sum, i)?.max(0.0),
                    temperature: Self::value(&self.temperature_2m_mean, i),
                    humidity: Self::value(&self.relative_humidity_2m_mean, i),
                })
            })
            .collect()
    }

    /// One historical observation per complete day, stamped at noon UTC.
    fn into_history(self, field_id: &str) -> Vec<WeatherObservation> {
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN);
        self.time
            .iter()
            .enumerate()
            .filter_map(|(i, &date)| {
                Some(WeatherObservation {
                    field_id: field_id.to_string(),
                    timestamp: date.and_time(noon).and_utc(),
                    kind: WeatherKind::Historical,
                    temperature: Self::value(&self.temperature_2m_mean, i)?,
                    humidity: Self::value(&self.relative_humidity_2m_mean, i)?,
                    rainfall: Self::value(&self.precipitation_sum, i)?.max(0.0),
                })
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct OpenMeteoClient {
    http: reqwest::Client,
    forecast_url: String,
    archive_url: String,
}

impl OpenMeteoClient {
    pub fn new(config: &WeatherConfig) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EngineError::ForecastUnavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            forecast_url: config.forecast_url.clone(),
            archive_url: config.archive_url.clone(),
        })
    }

    async fn get_daily(&self, url: &str, query: &[(&str, String)]) -> Result<DailyBlock, EngineError> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| EngineError::ForecastUnavailable(format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::ForecastUnavailable(format!("{url} returned {status}")));
        }
        let body: DailyResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::ForecastUnavailable(format!("malformed response from {url}: {e}")))?;
        Ok(body.daily)
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoClient {
    async fn forecast(
        &self,
        latitude: f64,
        longitude: f64,
        horizon_days: u32,
    ) -> Result<Vec<ExternalForecastDay>, EngineError> {
        let query = [
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            ("daily", DAILY_VARIABLES.to_string()),
            ("forecast_days", (horizon_days + 1).to_string()),
            ("timezone", "UTC".to_string()),
        ];
        let days = self.get_daily(&self.forecast_url, &query).await?.into_forecast(horizon_days);
        debug!(latitude, longitude, days = days.len(), "Open-Meteo forecast fetched");
        Ok(days)
    }

    async fn history(
        &self,
        field_id: &str,
        latitude: f64,
        longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherObservation>, EngineError> {
        let query = [
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            ("start_date", start.to_string()),
            ("end_date", end.to_string()),
            ("daily", DAILY_VARIABLES.to_string()),
            ("timezone", "UTC".to_string()),
        ];
        let block = self.get_daily(&self.archive_url, &query).await?;
        let requested = block.time.len();
        let observations = block.into_history(field_id);
        if observations.len() < requested {
            warn!(
                field_id = %field_id,
                requested,
                usable = observations.len(),
                "Archive returned incomplete days"
            );
        }
        Ok(observations)
    }

    fn name(&self) -> &'static str {
        "open-meteo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORECAST_BODY: &str = r#"{
        "latitude": 30.7, "longitude": 76.7,
        "daily": {
            "time": ["2026-06-01", "2026-06-02", "2026-06-03", "2026-06-04"],
            "precipitation_sum": [0.0, 2.4, null, 11.0],
            "temperature_2m_mean": [31.0, 30.2, 29.8, 27.5],
            "relative_humidity_2m_mean": [40, 48, 55, 80]
        }
    }"#;

    #[test]
    fn test_forecast_skips_today_and_missing_rain() {
        let body: DailyResponse = serde_json::from_str(FORECAST_BODY).unwrap();
        let days = body.daily.into_forecast(3);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].day_offset, 1);
        assert!((days[0].rainfall_mm - 2.4).abs() < 1e-12);
        assert_eq!(days[1].day_offset, 3);
        assert_eq!(days[1].humidity, Some(80.0));
    }

    #[test]
    fn test_forecast_respects_horizon() {
        let body: DailyResponse = serde_json::from_str(FORECAST_BODY).unwrap();
        let days = body.daily.into_forecast(1);
        assert_eq!(days.len(), 1);
    }

    #[test]
    fn test_history_drops_incomplete_days() {
        let body: DailyResponse = serde_json::from_str(FORECAST_BODY).unwrap();
        let obs = body.daily.into_history("f9");
        assert_eq!(obs.len(), 3);
        assert_eq!(obs[0].field_id, "f9");
        assert_eq!(obs[0].timestamp.to_rfc3339(), "2026-06-01T12:00:00+00:00");
        assert!(obs.iter().all(|o| o.kind == WeatherKind::Historical));
    }
}
