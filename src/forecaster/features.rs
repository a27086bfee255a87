//! Daily feature aggregation for the rainfall model.
//!
//! Raw weather observations are collapsed per UTC day into mean
//! temperature, mean humidity and total rainfall.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::WeatherObservation;

/// Number of model input features.
pub const NUM_FEATURES: usize = 3;

/// Feature names in input order. Stored in every artifact.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = ["temperature", "humidity", "rainfall"];

/// Index of the predicted feature.
pub const RAINFALL_INDEX: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyFeatures {
    pub date: NaiveDate,
    pub temperature: f64,
    pub humidity: f64,
    pub rainfall: f64,
}

impl DailyFeatures {
    pub const fn as_array(&self) -> [f64; NUM_FEATURES] {
        [self.temperature, self.humidity, self.rainfall]
    }
}

/// Aggregate observations into one row per UTC day, oldest first.
pub fn aggregate_daily(observations: &[WeatherObservation]) -> Vec<DailyFeatures> {
    // date -> (count, temp sum, humidity sum, rain sum)
    let mut days: BTreeMap<NaiveDate, (u32, f64, f64, f64)> = BTreeMap::new();
    for obs in observations {
        let entry = days.entry(obs.timestamp.date_naive()).or_insert((0, 0.0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += obs.temperature;
        entry.2 += obs.humidity;
        entry.3 += obs.rainfall.max(0.0);
    }

    days.into_iter()
        .map(|(date, (n, temp, hum, rain))| {
            let n = f64::from(n);
            DailyFeatures {
                date,
                temperature: temp / n,
                humidity: hum / n,
                rainfall: rain,
            }
        })
        .collect()
}

/// Split a day series into runs of consecutive dates.
pub fn contiguous_runs(days: &[DailyFeatures]) -> Vec<&[DailyFeatures]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=days.len() {
        let breaks = i == days.len() || days[i].date.pred_opt() != Some(days[i - 1].date);
        if breaks {
            if i > start {
                runs.push(&days[start..i]);
            }
            start = i;
        }
    }
    runs
}

/// The `window` most recent consecutive days ending no earlier than
/// `max_lag_days` before `reference`. Days after `reference` are ignored.
pub fn inference_window(
    days: &[DailyFeatures],
    window: usize,
    reference: NaiveDate,
    max_lag_days: i64,
) -> Result<&[DailyFeatures], EngineError> {
    let usable = days.partition_point(|d| d.date <= reference);
    let days = &days[..usable];

    let Some(last) = days.last() else {
        return Err(EngineError::InsufficientData("no daily weather history".to_string()));
    };
    let lag = (reference - last.date).num_days();
    if lag > max_lag_days {
        return Err(EngineError::InsufficientData(format!(
            "latest weather day {} is {lag} days old (max {max_lag_days})",
            last.date
        )));
    }
    if days.len() < window {
        return Err(EngineError::InsufficientData(format!(
            "{} days of weather history, model needs {window}",
            days.len()
        )));
    }

    let slice = &days[days.len() - window..];
    if contiguous_runs(slice).len() != 1 {
        return Err(EngineError::InsufficientData(format!(
            "last {window} days of weather history contain gaps"
        )));
    }
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WeatherKind;
    use chrono::{Duration, TimeZone, Utc};

    fn obs(day: u32, hour: u32, temp: f64, rain: f64) -> WeatherObservation {
        WeatherObservation {
            field_id: "f1".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap(),
            kind: WeatherKind::Historical,
            temperature: temp,
            humidity: 50.0,
            rainfall: rain,
        }
    }

    fn series(start: NaiveDate, n: i64) -> Vec<DailyFeatures> {
        (0..n)
            .map(|i| DailyFeatures {
                date: start + Duration::days(i),
                temperature: 20.0,
                humidity: 60.0,
                rainfall: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_aggregate_means_and_sums() {
        let daily = aggregate_daily(&[obs(1, 6, 10.0, 1.0), obs(1, 18, 20.0, 2.5), obs(2, 12, 15.0, 0.0)]);
        assert_eq!(daily.len(), 2);
        assert!((daily[0].temperature - 15.0).abs() < 1e-12);
        assert!((daily[0].rainfall - 3.5).abs() < 1e-12);
        assert!(daily[1].rainfall.abs() < f64::EPSILON);
    }

    #[test]
    fn test_contiguous_runs_split_on_gap() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let mut days = series(start, 3);
        days.extend(series(start + Duration::days(5), 2));
        let runs = contiguous_runs(&days);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].len(), 3);
        assert_eq!(runs[1].len(), 2);
    }

    #[test]
    fn test_inference_window_takes_most_recent() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let days = series(start, 40);
        let reference = start + Duration::days(39);
        let w = inference_window(&days, 30, reference, 2).unwrap();
        assert_eq!(w.len(), 30);
        assert_eq!(w.last().unwrap().date, reference);
    }

    #[test]
    fn test_inference_window_rejects_short_or_stale() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let days = series(start, 10);
        assert!(matches!(
            inference_window(&days, 30, start + Duration::days(9), 2),
            Err(EngineError::InsufficientData(_))
        ));
        let days = series(start, 40);
        assert!(matches!(
            inference_window(&days, 30, start + Duration::days(50), 2),
            Err(EngineError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_inference_window_rejects_gaps() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let mut days = series(start, 20);
        days.extend(series(start + Duration::days(21), 15));
        let reference = start + Duration::days(35);
        assert!(inference_window(&days, 30, reference, 2).is_err());
    }
}
