//! Divergence detector.
//!
//! Compares the internal rainfall forecast with the external provider's for
//! the day offsets both cover. A day is flagged when the absolute
//! difference exceeds `absolute_tolerance_mm`, or when the relative
//! difference (against the larger forecast) exceeds `relative_tolerance`
//! and the absolute difference is above `relative_floor_mm` (0 by default,
//! so any amount qualifies). Days missing
//! from either side are skipped silently.

use crate::config::DivergenceConfig;
use crate::types::{AlertSeverity, ForecastVector, RiskAlert};

#[derive(Debug, Clone)]
pub struct DivergenceDetector {
    config: DivergenceConfig,
}

impl DivergenceDetector {
    pub const fn new(config: DivergenceConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &DivergenceConfig {
        &self.config
    }

    /// At most one alert per day offset, in ascending offset order.
    pub fn detect(&self, internal: &ForecastVector, external: &ForecastVector) -> Vec<RiskAlert> {
        let mut offsets: Vec<u32> = internal.points.iter().map(|p| p.day_offset).collect();
        offsets.sort_unstable();
        offsets.dedup();

        offsets
            .into_iter()
            .filter_map(|day| {
                let a = internal.rainfall_on(day)?;
                let b = external.rainfall_on(day)?;
                self.compare(day, a, b)
            })
            .collect()
    }

    fn compare(&self, day_offset: u32, internal_mm: f64, external_mm: f64) -> Option<RiskAlert> {
        if !internal_mm.is_finite() || !external_mm.is_finite() {
            return None;
        }
        let diff = (internal_mm - external_mm).abs();
        let larger = internal_mm.max(external_mm);
        let relative = if larger > 0.0 { diff / larger } else { 0.0 };

        let absolute_hit = diff > self.config.absolute_tolerance_mm;
        let relative_hit =
            relative > self.config.relative_tolerance && diff > self.config.relative_floor_mm;
        if !absolute_hit && !relative_hit {
            return None;
        }

        let severity = if diff > 2.0 * self.config.absolute_tolerance_mm {
            AlertSeverity::High
        } else if absolute_hit {
            AlertSeverity::Medium
        } else {
            AlertSeverity::Low
        };

        let wetter = if external_mm > internal_mm {
            "external forecast expects more rain"
        } else {
            "internal model expects more rain"
        };
        let message = format!(
            "Day +{day_offset}: internal model predicts {internal_mm:.1} mm, external forecast \
             {external_mm:.1} mm (difference {diff:.1} mm, {wetter}); verify before acting on \
             the irrigation advice"
        );

        Some(RiskAlert {
            day_offset,
            internal_mm,
            external_mm,
            absolute_diff_mm: diff,
            relative_diff: relative,
            severity,
            message,
        })
    }
}

impl Default for DivergenceDetector {
    fn default() -> Self {
        Self::new(DivergenceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ForecastPoint;

    fn v(values: &[f64]) -> ForecastVector {
        ForecastVector::from_values(values, None)
    }

    #[test]
    fn test_single_day_divergence() {
        let alerts = DivergenceDetector::default().detect(&v(&[0.0, 1.0, 0.0]), &v(&[0.0, 15.0, 0.0]));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].day_offset, 2);
        assert_eq!(alerts[0].severity, AlertSeverity::Medium);
        assert!((alerts[0].absolute_diff_mm - 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_within_tolerance_is_silent() {
        let alerts = DivergenceDetector::default().detect(&v(&[3.0, 8.0, 1.0]), &v(&[4.0, 9.0, 1.5]));
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_relative_rule_applies_to_small_amounts_by_default() {
        // 0.2 vs 1.5: 87% apart
        let alerts = DivergenceDetector::default().detect(&v(&[0.2]), &v(&[1.5]));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Low);
        assert!(DivergenceDetector::default().detect(&v(&[0.0]), &v(&[0.0])).is_empty());
    }

    #[test]
    fn test_relative_floor_suppresses_drizzle() {
        let d = DivergenceDetector::new(DivergenceConfig {
            relative_floor_mm: 2.0,
            ..DivergenceConfig::default()
        });
        assert!(d.detect(&v(&[0.2]), &v(&[1.5])).is_empty());
        // 1 vs 6: 83% and 5 mm
        let alerts = d.detect(&v(&[1.0]), &v(&[6.0]));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Low);
    }

    #[test]
    fn test_days_missing_on_either_side_are_skipped() {
        let internal = v(&[0.0, 0.0, 0.0]);
        let external = ForecastVector {
            points: vec![ForecastPoint {
                day_offset: 3,
                rainfall_mm: 40.0,
            }],
            model_version: None,
        };
        let alerts = DivergenceDetector::default().detect(&internal, &external);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].day_offset, 3);
        assert_eq!(alerts[0].severity, AlertSeverity::High);

        assert!(DivergenceDetector::default().detect(&v(&[]), &v(&[50.0])).is_empty());
    }

    #[test]
    fn test_at_most_one_alert_per_day() {
        let alerts = DivergenceDetector::default().detect(&v(&[0.0; 3]), &v(&[30.0; 3]));
        let mut days: Vec<u32> = alerts.iter().map(|a| a.day_offset).collect();
        days.dedup();
        assert_eq!(days, vec![1, 2, 3]);
    }
}
