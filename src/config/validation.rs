//! Config validation: unknown-key detection with Levenshtein suggestions.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// A non-fatal config warning (typo, unknown section).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `EngineConfig`.
///
/// Maintained by hand to match the struct hierarchy in engine_config.rs.
/// Array-of-table entries (`[[rules.overrides]]`) are not walked.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [aggregator]
        "aggregator",
        "aggregator.sensor_max_age_hours",
        "aggregator.weather_max_age_hours",
        "aggregator.image_max_age_hours",
        "aggregator.weather_history_days",
        "aggregator.weights",
        "aggregator.weights.sensor",
        "aggregator.weights.weather",
        "aggregator.weights.image",
        // [forecaster]
        "forecaster",
        "forecaster.window_days",
        "forecaster.horizon_days",
        "forecaster.min_training_days",
        "forecaster.hidden_size",
        "forecaster.epochs",
        "forecaster.learning_rate",
        "forecaster.l2_penalty",
        "forecaster.seed",
        "forecaster.inference_timeout_ms",
        "forecaster.max_input_lag_days",
        "forecaster.model_dir",
        // [retrain]
        "retrain",
        "retrain.enabled",
        "retrain.check_interval_secs",
        "retrain.max_model_age_hours",
        "retrain.min_new_observations",
        // [rules]
        "rules",
        "rules.missing_forecast_policy",
        "rules.rain_skip_threshold_mm",
        "rules.irrigation_lookahead_days",
        "rules.overrides",
        // [divergence]
        "divergence",
        "divergence.absolute_tolerance_mm",
        "divergence.relative_tolerance",
        "divergence.relative_floor_mm",
        // [orchestrator]
        "orchestrator",
        "orchestrator.workers",
        "orchestrator.queue_capacity",
        "orchestrator.external_forecast_timeout_ms",
        "orchestrator.stale_forecast_max_age_hours",
        // [weather]
        "weather",
        "weather.enabled",
        "weather.forecast_url",
        "weather.archive_url",
        "weather.request_timeout_secs",
        // [server]
        "server",
        "server.bind_address",
        // [storage]
        "storage",
        "storage.data_dir",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new(); // parse errors are reported by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}
