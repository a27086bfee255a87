//! Last-known-good external forecast per field.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

use crate::types::{ExternalForecast, FieldId};

/// A cached forecast and how old it is relative to the lookup time.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedForecast {
    pub forecast: ExternalForecast,
    pub age: Duration,
}

#[derive(Debug, Default)]
pub struct ForecastCache {
    entries: RwLock<HashMap<FieldId, ExternalForecast>>,
    max_age: Option<Duration>,
}

impl ForecastCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_age: Some(max_age),
        }
    }

    /// Remember a successful fetch. An older fetch never replaces a newer one.
    pub fn store(&self, field_id: &str, forecast: ExternalForecast) {
        if let Ok(mut entries) = self.entries.write() {
            let newer = entries
                .get(field_id)
                .map_or(true, |existing| existing.fetched_at <= forecast.fetched_at);
            if newer {
                entries.insert(field_id.to_string(), forecast);
            }
        }
    }

    /// The cached forecast if it is no older than the configured limit.
    pub fn last_good(&self, field_id: &str, now: DateTime<Utc>) -> Option<CachedForecast> {
        let entries = self.entries.read().ok()?;
        let forecast = entries.get(field_id)?;
        let age = now - forecast.fetched_at;
        if self.max_age.is_some_and(|max| age > max) {
            return None;
        }
        Some(CachedForecast {
            forecast: forecast.clone(),
            age,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
