//! Time-series rainfall forecaster.
//!
//! Per field: `Untrained -> Trained -> (retrain) -> Trained`, with
//! `Disabled` when a stored artifact is incompatible or unreadable.
//!
//! ## Pipeline
//!
//! 1. Raw weather observations are aggregated per day ([`features`]).
//! 2. Features are z-scored with the artifact's stored scaler
//!    ([`normalizer`]).
//! 3. The most recent `window_days` run through a seeded CfC encoder
//!    ([`cell`]); a linear readout trained with Adam ([`training`]) maps the
//!    final hidden state to `horizon_days` rainfall totals.
//! 4. Outputs are converted back to millimetres and clamped at zero.
//!
//! Inference is pure: the same artifact and window give the same vector.

pub mod artifact;
pub mod backtest;
pub mod cell;
pub mod features;
pub mod model;
pub mod normalizer;
pub mod registry;
pub mod scheduler;
pub mod training;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

pub use artifact::{ModelArtifact, SCHEMA_VERSION};
pub use backtest::{BacktestReport, OffsetError};
pub use features::{aggregate_daily, DailyFeatures};
pub use registry::{ModelRegistry, ModelState, ModelStatus};
pub use scheduler::{RetrainPolicy, RetrainReason, RetrainScheduler};

use crate::config::ForecasterConfig;
use crate::error::EngineError;
use crate::types::{ForecastVector, WeatherObservation};
use model::RainfallModel;
use training::TrainingParams;

/// Inference seam used by the recommendation pipeline.
pub trait RainfallPredictor: Send + Sync {
    /// Rainfall keyed by day offset after `reference`, from history up to
    /// `reference`.
    fn predict(
        &self,
        field_id: &str,
        history: &[WeatherObservation],
        reference: NaiveDate,
    ) -> Result<ForecastVector, EngineError>;
}

/// Trains, serves and evaluates per-field rainfall models.
pub struct Forecaster {
    config: ForecasterConfig,
    registry: ModelRegistry,
}

impl Forecaster {
    /// Forecaster persisting artifacts under `config.model_dir`.
    pub fn new(config: ForecasterConfig) -> Self {
        let registry = ModelRegistry::new(config.clone(), Some(config.model_dir.clone()));
        Self { config, registry }
    }

    /// Forecaster whose artifacts live only in memory.
    pub fn in_memory(config: ForecasterConfig) -> Self {
        let registry = ModelRegistry::in_memory(config.clone());
        Self { config, registry }
    }

    pub const fn config(&self) -> &ForecasterConfig {
        &self.config
    }

    pub const fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn status(&self, field_id: &str) -> Result<ModelStatus, EngineError> {
        self.registry.status(field_id)
    }

    fn training_params(&self) -> TrainingParams {
        TrainingParams {
            epochs: self.config.epochs,
            learning_rate: self.config.learning_rate,
            l2_penalty: self.config.l2_penalty,
        }
    }

    /// Train a new model from the field's historical weather and make it the
    /// active version. CPU-bound; call from a blocking context.
    ///
    /// Fails with `InsufficientData` when fewer than `min_training_days`
    /// daily rows exist, leaving the current state untouched.
    pub fn train(
        &self,
        field_id: &str,
        history: &[WeatherObservation],
        now: DateTime<Utc>,
    ) -> Result<Arc<ModelArtifact>, EngineError> {
        let days = aggregate_daily(history);
        let (Some(first), Some(last)) = (days.first(), days.last()) else {
            return Err(EngineError::InsufficientData(format!(
                "field {field_id} has no weather history"
            )));
        };
        if days.len() < self.config.min_training_days {
            return Err(EngineError::InsufficientData(format!(
                "field {field_id} has {} days of weather history, training needs {}",
                days.len(),
                self.config.min_training_days
            )));
        }
        let (training_start, training_end) = (first.date, last.date);

        let started = std::time::Instant::now();
        let (model, report) = RainfallModel::fit(
            &days,
            self.config.window_days,
            self.config.horizon_days,
            self.config.hidden_size,
            self.config.seed,
            self.training_params(),
        );
        if report.samples == 0 {
            return Err(EngineError::InsufficientData(format!(
                "field {field_id} has no gap-free run of {} days",
                self.config.window_days + self.config.horizon_days
            )));
        }

        info!(
            field_id = %field_id,
            days = days.len(),
            samples = report.samples,
            initial_loss = report.initial_loss,
            final_loss = report.final_loss,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Rainfall model trained"
        );

        let artifact = ModelArtifact {
            schema_version: SCHEMA_VERSION,
            field_id: field_id.to_string(),
            version: 0,
            feature_order: ModelArtifact::feature_order(),
            window_days: self.config.window_days,
            horizon_days: self.config.horizon_days,
            hidden_size: self.config.hidden_size,
            seed: self.config.seed,
            trained_at: now,
            training_start,
            training_end,
            training_days: days.len(),
            report,
            model,
        };
        self.registry.replace(artifact)
    }

    /// Forecast rainfall for day offsets after `reference`, using history up
    /// to and including `reference`. When the newest input day lags
    /// `reference`, offsets are shifted and days already past are dropped.
    pub fn predict(
        &self,
        field_id: &str,
        history: &[WeatherObservation],
        reference: NaiveDate,
    ) -> Result<ForecastVector, EngineError> {
        let artifact = self.registry.active(field_id)?;
        let days = aggregate_daily(history);
        let window = features::inference_window(
            &days,
            artifact.window_days,
            reference,
            self.config.max_input_lag_days,
        )?;
        let Some(last_input) = window.last().map(|d| d.date) else {
            return Err(EngineError::InsufficientData("empty inference window".to_string()));
        };
        let values = artifact.model.predict(window);
        debug!(
            field_id = %field_id,
            version = artifact.version,
            last_input = %last_input,
            forecast = ?values,
            "Rainfall forecast"
        );
        Ok(ForecastVector::anchored(&values, last_input, reference, Some(artifact.version)))
    }

    /// Evaluate the active model over the field's history.
    pub fn backtest(
        &self,
        field_id: &str,
        history: &[WeatherObservation],
    ) -> Result<BacktestReport, EngineError> {
        let artifact = self.registry.active(field_id)?;
        let days = aggregate_daily(history);
        backtest::evaluate(&artifact, &days)
    }
}

impl RainfallPredictor for Forecaster {
    fn predict(
        &self,
        field_id: &str,
        history: &[WeatherObservation],
        reference: NaiveDate,
    ) -> Result<ForecastVector, EngineError> {
        Self::predict(self, field_id, history, reference)
    }
}
