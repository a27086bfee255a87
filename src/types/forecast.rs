//! Rainfall forecast vectors from the internal model and the external provider.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Predicted rainfall for one day after the reference day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// 1 = tomorrow.
    pub day_offset: u32,
    pub rainfall_mm: f64,
}

/// Ordered short-horizon rainfall predictions indexed by day offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastVector {
    pub points: Vec<ForecastPoint>,
    /// Artifact version that produced the vector, if it came from the model.
    #[serde(default)]
    pub model_version: Option<u64>,
}

impl ForecastVector {
    /// Build a vector from consecutive values starting at day offset 1.
    pub fn from_values(values: &[f64], model_version: Option<u64>) -> Self {
        let points = values
            .iter()
            .zip(1u32..)
            .map(|(&rainfall_mm, day_offset)| ForecastPoint { day_offset, rainfall_mm })
            .collect();
        Self { points, model_version }
    }

    /// Label consecutive model outputs for the days after `last_input`,
    /// re-expressed as offsets from `reference`. Days on or before
    /// `reference` are dropped.
    pub fn anchored(
        values: &[f64],
        last_input: NaiveDate,
        reference: NaiveDate,
        model_version: Option<u64>,
    ) -> Self {
        let lag = (reference - last_input).num_days();
        let points = values
            .iter()
            .zip(1i64..)
            .filter_map(|(&rainfall_mm, step)| {
                let day_offset = u32::try_from(step - lag).ok().filter(|o| *o > 0)?;
                Some(ForecastPoint { day_offset, rainfall_mm })
            })
            .collect();
        Self { points, model_version }
    }

    pub fn rainfall_on(&self, day_offset: u32) -> Option<f64> {
        self.points
            .iter()
            .find(|p| p.day_offset == day_offset)
            .map(|p| p.rainfall_mm)
    }

    pub fn horizon(&self) -> usize {
        self.points.len()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.rainfall_mm).collect()
    }
}

/// Forecast handed to the rule engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastInput<'a> {
    Available(&'a ForecastVector),
    NotAvailable { reason: String },
}

impl<'a> ForecastInput<'a> {
    pub const fn vector(&self) -> Option<&'a ForecastVector> {
        match self {
            Self::Available(v) => Some(v),
            Self::NotAvailable { .. } => None,
        }
    }
}

/// One day of the external provider's forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalForecastDay {
    pub day_offset: u32,
    pub date: NaiveDate,
    pub rainfall_mm: f64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// How fresh the external forecast attached to a recommendation is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExternalForecastStatus {
    Live,
    /// Last-known-good copy served after the provider failed.
    Stale { fetched_at: DateTime<Utc> },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalForecast {
    pub fetched_at: DateTime<Utc>,
    pub days: Vec<ExternalForecastDay>,
}

impl ExternalForecast {
    /// Rainfall by day offset, in the same shape as the internal forecast.
    pub fn as_vector(&self) -> ForecastVector {
        let points = self
            .days
            .iter()
            .map(|d| ForecastPoint {
                day_offset: d.day_offset,
                rainfall_mm: d.rainfall_mm,
            })
            .collect();
        ForecastVector {
            points,
            model_version: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_values_assigns_offsets_from_one() {
        let v = ForecastVector::from_values(&[0.5, 2.0, 0.0], Some(3));
        assert_eq!(v.horizon(), 3);
        assert_eq!(v.rainfall_on(1), Some(0.5));
        assert_eq!(v.rainfall_on(3), Some(0.0));
        assert_eq!(v.rainfall_on(4), None);
    }

    #[test]
    fn test_anchored_shifts_by_input_lag() {
        let last = NaiveDate::from_ymd_opt(2026, 5, 10).unwrap();
        let same_day = ForecastVector::anchored(&[0.5, 2.0, 4.0], last, last, None);
        assert_eq!(same_day, ForecastVector::from_values(&[0.5, 2.0, 4.0], None));

        // Input ends two days before the reference: only the third model day is still ahead
        let lagged = ForecastVector::anchored(&[0.5, 2.0, 4.0], last, last + chrono::Duration::days(2), Some(1));
        assert_eq!(lagged.horizon(), 1);
        assert_eq!(lagged.rainfall_on(1), Some(4.0));
        assert_eq!(lagged.rainfall_on(2), None);
    }
}
