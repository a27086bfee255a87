//! Feature scaling using Welford's algorithm.
//!
//! Fitted once over the training days and stored in the model artifact, so
//! inference normalizes with exactly the statistics the weights saw.

use serde::{Deserialize, Serialize};

use super::features::{DailyFeatures, NUM_FEATURES, RAINFALL_INDEX};

/// Standard deviation floor for constant features.
const MIN_STD: f64 = 1e-8;

/// Zero-mean, unit-variance scaler with numerically stable fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    count: u64,
    mean: [f64; NUM_FEATURES],
    m2: [f64; NUM_FEATURES],
}

impl FeatureScaler {
    pub const fn new() -> Self {
        Self {
            count: 0,
            mean: [0.0; NUM_FEATURES],
            m2: [0.0; NUM_FEATURES],
        }
    }

    /// Fit over every day in `days`.
    pub fn fit(days: &[DailyFeatures]) -> Self {
        let mut scaler = Self::new();
        for d in days {
            scaler.update(&d.as_array());
        }
        scaler
    }

    fn update(&mut self, raw: &[f64; NUM_FEATURES]) {
        self.count += 1;
        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        for (i, &x) in raw.iter().enumerate() {
            let delta = x - self.mean[i];
            self.mean[i] += delta / n;
            let delta2 = x - self.mean[i];
            self.m2[i] += delta * delta2;
        }
    }

    fn std(&self, i: usize) -> f64 {
        if self.count < 2 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let variance = self.m2[i] / (self.count as f64 - 1.0);
        variance.sqrt().max(MIN_STD)
    }

    pub fn transform(&self, raw: &[f64; NUM_FEATURES]) -> [f64; NUM_FEATURES] {
        let mut out = [0.0; NUM_FEATURES];
        for (i, v) in out.iter_mut().enumerate() {
            *v = (raw[i] - self.mean[i]) / self.std(i);
        }
        out
    }

    pub fn transform_rainfall(&self, mm: f64) -> f64 {
        (mm - self.mean[RAINFALL_INDEX]) / self.std(RAINFALL_INDEX)
    }

    /// Map a normalized rainfall value back to millimetres.
    pub fn inverse_rainfall(&self, z: f64) -> f64 {
        z.mul_add(self.std(RAINFALL_INDEX), self.mean[RAINFALL_INDEX])
    }

    pub const fn count(&self) -> u64 {
        self.count
    }

    pub const fn mean(&self) -> &[f64; NUM_FEATURES] {
        &self.mean
    }
}

impl Default for FeatureScaler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn day(i: i64, temp: f64, rain: f64) -> DailyFeatures {
        DailyFeatures {
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + Duration::days(i),
            temperature: temp,
            humidity: 60.0,
            rainfall: rain,
        }
    }

    #[test]
    fn test_fit_mean_and_unit_variance() {
        let days: Vec<_> = (0..1000).map(|i| day(i, i as f64, (i % 7) as f64)).collect();
        let scaler = FeatureScaler::fit(&days);
        assert_eq!(scaler.count(), 1000);
        assert!((scaler.mean()[0] - 499.5).abs() < 1e-9);

        let transformed: Vec<f64> = days.iter().map(|d| scaler.transform(&d.as_array())[0]).collect();
        let mean: f64 = transformed.iter().sum::<f64>() / 1000.0;
        let var: f64 = transformed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 999.0;
        assert!(mean.abs() < 1e-9);
        assert!((var - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_feature_does_not_blow_up() {
        let days: Vec<_> = (0..50).map(|i| day(i, 20.0, 0.0)).collect();
        let scaler = FeatureScaler::fit(&days);
        let t = scaler.transform(&days[0].as_array());
        assert!(t.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_rainfall_inverse_roundtrip() {
        let days: Vec<_> = (0..100).map(|i| day(i, 20.0, (i % 11) as f64 * 1.5)).collect();
        let scaler = FeatureScaler::fit(&days);
        let z = scaler.transform_rainfall(7.25);
        assert!((scaler.inverse_rainfall(z) - 7.25).abs() < 1e-9);
    }
}
