//! Per-request field snapshot and completeness scoring.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::field::{FieldProfile, ImageMeta, SensorSample, WeatherObservation};

/// Data modalities that can contribute to a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Sensor,
    Weather,
    Image,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor => write!(f, "sensor"),
            Self::Weather => write!(f, "weather"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// Relative weight of each modality in the completeness score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletenessWeights {
    #[serde(default = "default_sensor_weight")]
    pub sensor: f64,
    #[serde(default = "default_weather_weight")]
    pub weather: f64,
    #[serde(default = "default_image_weight")]
    pub image: f64,
}

const fn default_sensor_weight() -> f64 {
    0.4
}
const fn default_weather_weight() -> f64 {
    0.4
}
const fn default_image_weight() -> f64 {
    0.2
}

impl Default for CompletenessWeights {
    fn default() -> Self {
        Self {
            sensor: default_sensor_weight(),
            weather: default_weather_weight(),
            image: default_image_weight(),
        }
    }
}

impl CompletenessWeights {
    pub const fn weight(&self, modality: Modality) -> f64 {
        match modality {
            Modality::Sensor => self.sensor,
            Modality::Weather => self.weather,
            Modality::Image => self.image,
        }
    }

    pub fn total(&self) -> f64 {
        self.sensor + self.weather + self.image
    }
}

/// Weighted share of modalities present in a snapshot, in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessScore {
    pub value: f64,
    pub present: Vec<Modality>,
    pub missing: Vec<Modality>,
}

impl CompletenessScore {
    /// Sum the weights of the present modalities. Weights are non-negative
    /// so adding a modality never lowers the score.
    pub fn compute(present: &[Modality], weights: &CompletenessWeights) -> Self {
        let mut present: Vec<Modality> = present.to_vec();
        present.sort_unstable();
        present.dedup();

        let value: f64 = present.iter().map(|m| weights.weight(*m).max(0.0)).sum();
        let missing = [Modality::Sensor, Modality::Weather, Modality::Image]
            .into_iter()
            .filter(|m| !present.contains(m))
            .collect();

        Self {
            value: value.clamp(0.0, 1.0),
            present,
            missing,
        }
    }

    /// Score of a snapshot with no modality present.
    pub fn empty() -> Self {
        Self {
            value: 0.0,
            present: Vec::new(),
            missing: vec![Modality::Sensor, Modality::Weather, Modality::Image],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && !self.present.is_empty()
    }

    pub fn has(&self, modality: Modality) -> bool {
        self.present.contains(&modality)
    }
}

/// Weather portion of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    /// Historical observations inside the history window, oldest first.
    pub history: Vec<WeatherObservation>,
    /// Stored provider forecast points after the reference time, oldest first.
    pub forecast: Vec<WeatherObservation>,
}

impl WeatherSnapshot {
    pub fn latest(&self) -> Option<&WeatherObservation> {
        self.history.last()
    }
}

/// Unified, possibly partial view of one field at a reference time.
/// Derived on every request and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldState {
    pub profile: FieldProfile,
    pub reference_time: DateTime<Utc>,
    pub sensor: Option<SensorSample>,
    pub weather: Option<WeatherSnapshot>,
    pub image: Option<ImageMeta>,
    pub completeness: CompletenessScore,
}

impl FieldState {
    pub fn is_empty(&self) -> bool {
        self.sensor.is_none() && self.weather.is_none() && self.image.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = CompletenessWeights::default();
        assert!((w.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_weather_only_scores_point_four() {
        let score = CompletenessScore::compute(&[Modality::Weather], &CompletenessWeights::default());
        assert!((score.value - 0.4).abs() < 1e-12);
        assert_eq!(score.missing, vec![Modality::Sensor, Modality::Image]);
    }

    #[test]
    fn test_completeness_monotonic_over_all_subsets() {
        let weights = CompletenessWeights::default();
        let all = [Modality::Sensor, Modality::Weather, Modality::Image];
        for mask in 0u8..8 {
            let base: Vec<Modality> = all
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, m)| *m)
                .collect();
            let base_score = CompletenessScore::compute(&base, &weights).value;
            for extra in all {
                let mut grown = base.clone();
                grown.push(extra);
                let grown_score = CompletenessScore::compute(&grown, &weights).value;
                assert!(grown_score >= base_score, "{base:?} + {extra} decreased score");
            }
        }
    }

    #[test]
    fn test_empty_matches_computed_nothing() {
        let computed = CompletenessScore::compute(&[], &CompletenessWeights::default());
        assert_eq!(CompletenessScore::empty(), computed);
        assert!(!computed.is_complete());
    }

    #[test]
    fn test_duplicates_do_not_double_count() {
        let score = CompletenessScore::compute(
            &[Modality::Sensor, Modality::Sensor],
            &CompletenessWeights::default(),
        );
        assert!((score.value - 0.4).abs() < 1e-12);
    }
}
