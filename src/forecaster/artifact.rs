//! Self-describing model artifact persistence.
//!
//! An artifact records its schema version, feature order, window length,
//! horizon and scaler alongside the weights, so a load can reject a file
//! that does not match the running configuration instead of misreading it.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::features::FEATURE_NAMES;
use super::model::RainfallModel;
use super::training::TrainingReport;
use crate::config::ForecasterConfig;
use crate::error::EngineError;
use crate::types::FieldId;

/// Bumped whenever the serialized layout changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema_version: u32,
    pub field_id: FieldId,
    /// Monotonic per field; assigned by the registry on replace.
    pub version: u64,
    pub feature_order: Vec<String>,
    pub window_days: usize,
    pub horizon_days: usize,
    pub hidden_size: usize,
    pub seed: u64,
    pub trained_at: DateTime<Utc>,
    /// First and last day of the training history.
    pub training_start: NaiveDate,
    pub training_end: NaiveDate,
    pub training_days: usize,
    pub report: TrainingReport,
    pub model: RainfallModel,
}

impl ModelArtifact {
    pub fn feature_order() -> Vec<String> {
        FEATURE_NAMES.iter().map(ToString::to_string).collect()
    }

    /// Fail with `ConfigMismatch` unless this artifact can be served under
    /// `config`.
    pub fn check_compatible(&self, config: &ForecasterConfig) -> Result<(), EngineError> {
        let mut problems = Vec::new();
        if self.schema_version != SCHEMA_VERSION {
            problems.push(format!(
                "schema version {} (expected {SCHEMA_VERSION})",
                self.schema_version
            ));
        }
        if self.feature_order != Self::feature_order() {
            problems.push(format!(
                "feature order {:?} (expected {:?})",
                self.feature_order, FEATURE_NAMES
            ));
        }
        if self.window_days != config.window_days || self.model.window_days != config.window_days {
            problems.push(format!(
                "window {} days (configured {})",
                self.window_days, config.window_days
            ));
        }
        if self.horizon_days != config.horizon_days || self.model.horizon_days != config.horizon_days {
            problems.push(format!(
                "horizon {} days (configured {})",
                self.horizon_days, config.horizon_days
            ));
        }
        if !self.model.is_consistent() || self.model.encoder.hidden != self.hidden_size {
            problems.push("weight dimensions do not match recorded topology".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ConfigMismatch(format!(
                "artifact for field {} v{}: {}",
                self.field_id,
                self.version,
                problems.join("; ")
            )))
        }
    }
}

/// File name for a field's artifact. Characters outside `[A-Za-z0-9_-]`
/// are hex-escaped so distinct ids never collide.
pub fn artifact_path(model_dir: &Path, field_id: &str) -> PathBuf {
    let mut name = String::with_capacity(field_id.len() + 5);
    for b in field_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            name.push(char::from(b));
        } else {
            name.push_str(&format!("%{b:02X}"));
        }
    }
    name.push_str(".json");
    model_dir.join(name)
}

/// Save an artifact atomically (write temp file, then rename).
pub fn save_to_disk(artifact: &ModelArtifact, path: &Path) -> io::Result<()> {
    let json = serde_json::to_vec(artifact).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let tmp_path = path.with_extension("json.tmp");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&tmp_path, &json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load an artifact from disk. A missing file is `Ok(None)`.
pub fn load_from_disk(path: &Path) -> Result<Option<ModelArtifact>, EngineError> {
    let data = match std::fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(EngineError::ModelLoadError(format!("{}: {e}", path.display())));
        }
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| EngineError::ModelLoadError(format!("{}: {e}", path.display())))
}

/// Version recorded in a stored artifact, read leniently so a file that no
/// longer loads still reports it.
pub fn stored_version(path: &Path) -> Option<u64> {
    #[derive(Deserialize)]
    struct VersionOnly {
        version: u64,
    }
    let data = std::fs::read(path).ok()?;
    serde_json::from_slice::<VersionOnly>(&data).ok().map(|v| v.version)
}
