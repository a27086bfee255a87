//! Engine configuration - every tunable of the recommendation pipeline as TOML
//!
//! Each struct implements `Default` so a deployment without a config file
//! runs with the agronomic defaults baked into the rule table.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::rules::RuleTable;
use crate::types::{CompletenessWeights, CropType, GrowthStage};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "ROOTSPHERE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "rootsphere.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for an engine deployment.
///
/// Load with `EngineConfig::load()` which searches:
/// 1. `$ROOTSPHERE_CONFIG` env var
/// 2. `./rootsphere.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Snapshot staleness windows and completeness weights
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Rainfall model shape, training and inference limits
    #[serde(default)]
    pub forecaster: ForecasterConfig,

    /// When models are retrained
    #[serde(default)]
    pub retrain: RetrainConfig,

    /// Agronomic rule table and missing-forecast policy
    #[serde(default)]
    pub rules: RulesConfig,

    /// Internal vs external forecast tolerance
    #[serde(default)]
    pub divergence: DivergenceConfig,

    /// Worker pool and ticket handling
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// External weather provider
    #[serde(default)]
    pub weather: WeatherConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// On-disk state
    #[serde(default)]
    pub storage: StorageConfig,
}

impl EngineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$ROOTSPHERE_CONFIG` environment variable
    /// 2. `./rootsphere.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded engine config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded engine config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::ParseStr(err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse and validate TOML text. Unknown keys are logged, not rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents).map_err(ConfigError::ParseStr)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save config to a file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Engine config saved");
        Ok(())
    }

    /// Validate every section for internal consistency, collecting all
    /// problems before failing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let a = &self.aggregator;
        for (name, w) in [
            ("sensor", a.weights.sensor),
            ("weather", a.weights.weather),
            ("image", a.weights.image),
        ] {
            if !(0.0..=1.0).contains(&w) {
                errors.push(format!("aggregator.weights.{name} = {w} must be within [0, 1]"));
            }
        }
        let total = a.weights.total();
        if total > 1.0 + 1e-9 {
            errors.push(format!("aggregator.weights sum to {total:.3}, must not exceed 1.0"));
        }
        for (name, hours) in [
            ("sensor_max_age_hours", a.sensor_max_age_hours),
            ("weather_max_age_hours", a.weather_max_age_hours),
            ("image_max_age_hours", a.image_max_age_hours),
        ] {
            if hours == 0 {
                errors.push(format!("aggregator.{name} must be > 0"));
            }
        }
        if a.weather_history_days == 0 {
            errors.push("aggregator.weather_history_days must be > 0".to_string());
        }

        let f = &self.forecaster;
        if f.window_days < 2 {
            errors.push(format!("forecaster.window_days = {} must be >= 2", f.window_days));
        }
        if f.horizon_days == 0 || f.horizon_days > 14 {
            errors.push(format!("forecaster.horizon_days = {} must be within 1..=14", f.horizon_days));
        }
        if f.min_training_days < f.window_days + f.horizon_days + 1 {
            errors.push(format!(
                "forecaster.min_training_days = {} must exceed window_days + horizon_days ({})",
                f.min_training_days,
                f.window_days + f.horizon_days
            ));
        }
        if f.hidden_size == 0 {
            errors.push("forecaster.hidden_size must be > 0".to_string());
        }
        if f.epochs == 0 {
            errors.push("forecaster.epochs must be > 0".to_string());
        }
        if !(f.learning_rate > 0.0 && f.learning_rate.is_finite()) {
            errors.push(format!("forecaster.learning_rate = {} must be > 0", f.learning_rate));
        }
        if f.l2_penalty < 0.0 {
            errors.push(format!("forecaster.l2_penalty = {} cannot be negative", f.l2_penalty));
        }
        if f.inference_timeout_ms == 0 {
            errors.push("forecaster.inference_timeout_ms must be > 0".to_string());
        }

        let r = &self.retrain;
        if r.enabled && r.check_interval_secs == 0 {
            errors.push("retrain.check_interval_secs must be > 0 when retraining is enabled".to_string());
        }
        if r.min_new_observations == 0 {
            errors.push("retrain.min_new_observations must be > 0".to_string());
        }

        if self.rules.rain_skip_threshold_mm < 0.0 {
            errors.push(format!(
                "rules.rain_skip_threshold_mm = {} cannot be negative",
                self.rules.rain_skip_threshold_mm
            ));
        }
        if self.rules.irrigation_lookahead_days == 0
            || self.rules.irrigation_lookahead_days > f.horizon_days
        {
            errors.push(format!(
                "rules.irrigation_lookahead_days = {} must be within 1..=forecaster.horizon_days ({})",
                self.rules.irrigation_lookahead_days, f.horizon_days
            ));
        }
        // Lagged input shifts the model's days forward; the lookahead must stay covered
        let covered = i64::try_from(f.horizon_days).unwrap_or(i64::MAX)
            - i64::try_from(self.rules.irrigation_lookahead_days).unwrap_or(i64::MAX);
        if f.max_input_lag_days < 0 || f.max_input_lag_days > covered {
            errors.push(format!(
                "forecaster.max_input_lag_days = {} must be within 0..=horizon_days - rules.irrigation_lookahead_days ({covered})",
                f.max_input_lag_days
            ));
        }
        if let Err(table_errors) = RuleTable::from_config(&self.rules) {
            errors.extend(table_errors);
        }

        let d = &self.divergence;
        if d.absolute_tolerance_mm <= 0.0 {
            errors.push(format!(
                "divergence.absolute_tolerance_mm = {} must be > 0",
                d.absolute_tolerance_mm
            ));
        }
        if d.relative_tolerance <= 0.0 {
            errors.push(format!(
                "divergence.relative_tolerance = {} must be > 0",
                d.relative_tolerance
            ));
        }
        if d.relative_floor_mm < 0.0 {
            errors.push(format!(
                "divergence.relative_floor_mm = {} cannot be negative",
                d.relative_floor_mm
            ));
        }

        let o = &self.orchestrator;
        if o.workers == 0 {
            errors.push("orchestrator.workers must be > 0".to_string());
        }
        if o.queue_capacity == 0 {
            errors.push("orchestrator.queue_capacity must be > 0".to_string());
        }
        if o.external_forecast_timeout_ms == 0 {
            errors.push("orchestrator.external_forecast_timeout_ms must be > 0".to_string());
        }

        if self.weather.request_timeout_secs == 0 {
            errors.push("weather.request_timeout_secs must be > 0".to_string());
        }

        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "server.bind_address = '{}' is not a socket address",
                self.server.bind_address
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    ParseStr(toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            Self::Parse(path, e) => write!(f, "Config parse error ({}): {}", path.display(), e),
            Self::ParseStr(e) => write!(f, "Config parse error: {e}"),
            Self::Serialize(e) => write!(f, "Config serialization error: {e}"),
            Self::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Aggregator
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// A sensor sample older than this is treated as absent.
    #[serde(default = "default_sensor_max_age_hours")]
    pub sensor_max_age_hours: u64,

    /// The newest historical weather observation must be younger than this.
    #[serde(default = "default_weather_max_age_hours")]
    pub weather_max_age_hours: u64,

    #[serde(default = "default_image_max_age_hours")]
    pub image_max_age_hours: u64,

    /// Days of historical weather carried in a snapshot.
    #[serde(default = "default_weather_history_days")]
    pub weather_history_days: u32,

    #[serde(default)]
    pub weights: CompletenessWeights,
}

const fn default_sensor_max_age_hours() -> u64 {
    24
}
const fn default_weather_max_age_hours() -> u64 {
    6
}
const fn default_image_max_age_hours() -> u64 {
    168
}
const fn default_weather_history_days() -> u32 {
    7
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            sensor_max_age_hours: default_sensor_max_age_hours(),
            weather_max_age_hours: default_weather_max_age_hours(),
            image_max_age_hours: default_image_max_age_hours(),
            weather_history_days: default_weather_history_days(),
            weights: CompletenessWeights::default(),
        }
    }
}

// ============================================================================
// Forecaster
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecasterConfig {
    /// Days of daily-aggregated weather consumed per inference (W).
    #[serde(default = "default_window_days")]
    pub window_days: usize,

    /// Days of rainfall predicted (H).
    #[serde(default = "default_horizon_days")]
    pub horizon_days: usize,

    /// Daily records required before a field can be trained.
    #[serde(default = "default_min_training_days")]
    pub min_training_days: usize,

    /// Recurrent state size of the encoder cell.
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,

    #[serde(default = "default_epochs")]
    pub epochs: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Ridge penalty on readout weights.
    #[serde(default = "default_l2_penalty")]
    pub l2_penalty: f64,

    /// Seed for encoder weight initialisation.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Upper bound on model load + inference for one recommendation.
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,

    /// Newest input day may lag the reference day by at most this many days.
    /// Forecast days that fall on or before the reference day are dropped.
    #[serde(default = "default_max_input_lag_days")]
    pub max_input_lag_days: i64,

    /// Directory holding one JSON artifact per field.
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
}

const fn default_window_days() -> usize {
    30
}
const fn default_horizon_days() -> usize {
    3
}
const fn default_min_training_days() -> usize {
    500
}
const fn default_hidden_size() -> usize {
    24
}
const fn default_epochs() -> usize {
    400
}
const fn default_learning_rate() -> f64 {
    0.01
}
const fn default_l2_penalty() -> f64 {
    1e-4
}
const fn default_seed() -> u64 {
    42
}
const fn default_inference_timeout_ms() -> u64 {
    5_000
}
const fn default_max_input_lag_days() -> i64 {
    2
}
fn default_model_dir() -> PathBuf {
    PathBuf::from("data/models")
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            horizon_days: default_horizon_days(),
            min_training_days: default_min_training_days(),
            hidden_size: default_hidden_size(),
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            l2_penalty: default_l2_penalty(),
            seed: default_seed(),
            inference_timeout_ms: default_inference_timeout_ms(),
            max_input_lag_days: default_max_input_lag_days(),
            model_dir: default_model_dir(),
        }
    }
}

impl ForecasterConfig {
    pub const fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}

// ============================================================================
// Retrain Policy
// ============================================================================

/// Retrain when the model is older than `max_model_age_hours` and any new
/// daily observation exists, or when `min_new_observations` new days have
/// arrived since the training window ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    #[serde(default = "default_max_model_age_hours")]
    pub max_model_age_hours: i64,

    #[serde(default = "default_min_new_observations")]
    pub min_new_observations: usize,
}

const fn default_true() -> bool {
    true
}
const fn default_check_interval_secs() -> u64 {
    3_600
}
const fn default_max_model_age_hours() -> i64 {
    24
}
const fn default_min_new_observations() -> usize {
    30
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: default_check_interval_secs(),
            max_model_age_hours: default_max_model_age_hours(),
            min_new_observations: default_min_new_observations(),
        }
    }
}

// ============================================================================
// Rules
// ============================================================================

/// What the irrigation rule does for a day without a rainfall forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingForecastPolicy {
    /// Count the day as zero rainfall and flag the assumption.
    #[default]
    AssumeNoRain,
    /// Skip the irrigation rule entirely.
    SkipIrrigation,
}

/// Partial override of one rule-table entry. Unset fields keep the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleOverride {
    pub crop: CropType,
    pub stage: GrowthStage,
    pub moisture_threshold_pct: Option<f64>,
    pub irrigation_liters_per_acre: Option<f64>,
    pub nitrogen_min: Option<f64>,
    pub nitrogen_target: Option<f64>,
    pub phosphorus_min: Option<f64>,
    pub phosphorus_target: Option<f64>,
    pub potassium_min: Option<f64>,
    pub potassium_target: Option<f64>,
    pub ph_min: Option<f64>,
    pub ph_max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub missing_forecast_policy: MissingForecastPolicy,

    /// Irrigation is withheld when expected rain reaches this total.
    #[serde(default = "default_rain_skip_threshold_mm")]
    pub rain_skip_threshold_mm: f64,

    /// Forecast days summed for the irrigation decision.
    #[serde(default = "default_irrigation_lookahead_days")]
    pub irrigation_lookahead_days: usize,

    #[serde(default)]
    pub overrides: Vec<RuleOverride>,
}

const fn default_rain_skip_threshold_mm() -> f64 {
    5.0
}
const fn default_irrigation_lookahead_days() -> usize {
    1
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            missing_forecast_policy: MissingForecastPolicy::default(),
            rain_skip_threshold_mm: default_rain_skip_threshold_mm(),
            irrigation_lookahead_days: default_irrigation_lookahead_days(),
            overrides: Vec::new(),
        }
    }
}

// ============================================================================
// Divergence
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DivergenceConfig {
    #[serde(default = "default_absolute_tolerance_mm")]
    pub absolute_tolerance_mm: f64,

    /// Fraction of the larger forecast.
    #[serde(default = "default_relative_tolerance")]
    pub relative_tolerance: f64,

    /// Relative excess only counts above this absolute difference. Zero
    /// applies the relative rule to any amount.
    #[serde(default = "default_relative_floor_mm")]
    pub relative_floor_mm: f64,
}

const fn default_absolute_tolerance_mm() -> f64 {
    10.0
}
const fn default_relative_tolerance() -> f64 {
    0.5
}
const fn default_relative_floor_mm() -> f64 {
    0.0
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            absolute_tolerance_mm: default_absolute_tolerance_mm(),
            relative_tolerance: default_relative_tolerance(),
            relative_floor_mm: default_relative_floor_mm(),
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pending tickets beyond this are rejected with `QueueFull`.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_external_forecast_timeout_ms")]
    pub external_forecast_timeout_ms: u64,

    /// Cached provider forecasts older than this are not reused.
    #[serde(default = "default_stale_forecast_max_age_hours")]
    pub stale_forecast_max_age_hours: i64,
}

const fn default_workers() -> usize {
    4
}
const fn default_queue_capacity() -> usize {
    256
}
const fn default_external_forecast_timeout_ms() -> u64 {
    5_000
}
const fn default_stale_forecast_max_age_hours() -> i64 {
    24
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            external_forecast_timeout_ms: default_external_forecast_timeout_ms(),
            stale_forecast_max_age_hours: default_stale_forecast_max_age_hours(),
        }
    }
}

// ============================================================================
// Weather Provider
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Disable to run without any external forecast.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_forecast_url")]
    pub forecast_url: String,

    #[serde(default = "default_archive_url")]
    pub archive_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_forecast_url() -> String {
    "https://api.open-meteo.com/v1/forecast".to_string()
}
fn default_archive_url() -> String {
    "https://archive-api.open-meteo.com/v1/archive".to_string()
}
const fn default_request_timeout_secs() -> u64 {
    5
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            forecast_url: default_forecast_url(),
            archive_url: default_archive_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ============================================================================
// Server / Storage
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sled database directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}
