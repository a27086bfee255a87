//! Engine error taxonomy.
//!
//! `InsufficientData` and `ModelNotAvailable` degrade a recommendation to
//! rule-engine-only output. `ConfigMismatch` and `ModelLoadError` disable the
//! forecaster for one field. `Timeout` fails a single pending ticket.
//! `ValidationError` is returned synchronously at the ingestion boundary.

use std::time::Duration;

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("no trained model available for field {0}")]
    ModelNotAvailable(String),

    #[error("failed to load model artifact: {0}")]
    ModelLoadError(String),

    #[error("external forecast unavailable: {0}")]
    ForecastUnavailable(String),

    #[error("model artifact incompatible with current configuration: {0}")]
    ConfigMismatch(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("work queue is full ({0} pending)")]
    QueueFull(usize),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Errors after which the forecaster stays off for the affected field
    /// until an operator retrains or replaces the artifact.
    pub const fn disables_forecaster(&self) -> bool {
        matches!(self, Self::ConfigMismatch(_) | Self::ModelLoadError(_))
    }

    /// Errors that degrade a recommendation instead of failing it.
    pub const fn is_degrading(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData(_)
                | Self::ModelNotAvailable(_)
                | Self::ConfigMismatch(_)
                | Self::ModelLoadError(_)
                | Self::ForecastUnavailable(_)
        )
    }
}
