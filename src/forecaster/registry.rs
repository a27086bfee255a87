//! Per-field model registry.
//!
//! Each field owns one slot holding its active model state behind an
//! [`ArcSwap`]. Inference takes a snapshot `Arc` of the current artifact and
//! never blocks on writers; `replace` persists the new artifact first and
//! then swaps the pointer, so readers see either the old or the new version
//! in full. Writers are serialized by a mutex.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use arc_swap::ArcSwap;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::artifact::{artifact_path, load_from_disk, save_to_disk, stored_version, ModelArtifact};
use crate::config::ForecasterConfig;
use crate::error::EngineError;
use crate::types::FieldId;

/// Why a field's forecaster is switched off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisabledReason {
    ConfigMismatch(String),
    LoadError(String),
}

impl DisabledReason {
    fn to_error(&self) -> EngineError {
        match self {
            Self::ConfigMismatch(m) => EngineError::ConfigMismatch(m.clone()),
            Self::LoadError(m) => EngineError::ModelLoadError(m.clone()),
        }
    }

    fn from_error(err: &EngineError) -> Self {
        match err {
            EngineError::ConfigMismatch(m) => Self::ConfigMismatch(m.clone()),
            other => Self::LoadError(other.to_string()),
        }
    }
}

/// Lifecycle state of one field's forecaster.
#[derive(Debug, Clone)]
pub enum ModelState {
    Untrained,
    Trained(Arc<ModelArtifact>),
    Disabled(DisabledReason),
}

/// Summary of a field's model for status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelStatus {
    Untrained,
    Trained {
        version: u64,
        trained_at: DateTime<Utc>,
        training_start: NaiveDate,
        training_end: NaiveDate,
        training_days: usize,
        final_loss: f64,
    },
    Disabled {
        reason: String,
    },
}

impl From<&ModelState> for ModelStatus {
    fn from(state: &ModelState) -> Self {
        match state {
            ModelState::Untrained => Self::Untrained,
            ModelState::Trained(a) => Self::Trained {
                version: a.version,
                trained_at: a.trained_at,
                training_start: a.training_start,
                training_end: a.training_end,
                training_days: a.training_days,
                final_loss: a.report.final_loss,
            },
            ModelState::Disabled(r) => Self::Disabled {
                reason: r.to_error().to_string(),
            },
        }
    }
}

type Slot = Arc<ArcSwap<ModelState>>;

pub struct ModelRegistry {
    config: ForecasterConfig,
    /// `None` keeps artifacts in memory only.
    model_dir: Option<PathBuf>,
    slots: RwLock<HashMap<FieldId, Slot>>,
    write_lock: Mutex<()>,
}

impl ModelRegistry {
    pub fn new(config: ForecasterConfig, model_dir: Option<PathBuf>) -> Self {
        Self {
            config,
            model_dir,
            slots: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory(config: ForecasterConfig) -> Self {
        Self::new(config, None)
    }

    pub const fn config(&self) -> &ForecasterConfig {
        &self.config
    }

    fn poisoned<T>(e: &std::sync::PoisonError<T>) -> EngineError {
        EngineError::ModelLoadError(format!("registry lock poisoned: {e}"))
    }

    fn existing_slot(&self, field_id: &str) -> Result<Option<Slot>, EngineError> {
        let slots = self.slots.read().map_err(|e| Self::poisoned(&e))?;
        Ok(slots.get(field_id).cloned())
    }

    /// Slot for `field_id`, loading it from disk on first access.
    fn slot(&self, field_id: &str) -> Result<Slot, EngineError> {
        if let Some(slot) = self.existing_slot(field_id)? {
            return Ok(slot);
        }
        let state = self.read_from_disk(field_id);
        let mut slots = self.slots.write().map_err(|e| Self::poisoned(&e))?;
        Ok(slots
            .entry(field_id.to_string())
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(state)))
            .clone())
    }

    fn read_from_disk(&self, field_id: &str) -> ModelState {
        let Some(dir) = self.model_dir.as_ref() else {
            return ModelState::Untrained;
        };
        let path = artifact_path(dir, field_id);
        let loaded = load_from_disk(&path).and_then(|maybe| match maybe {
            Some(a) if a.field_id != field_id => Err(EngineError::ModelLoadError(format!(
                "{} holds a model for field {}",
                path.display(),
                a.field_id
            ))),
            Some(a) => a.check_compatible(&self.config).map(|()| Some(a)),
            None => Ok(None),
        });

        match loaded {
            Ok(Some(a)) => {
                info!(field_id = %field_id, version = a.version, "Loaded model artifact");
                ModelState::Trained(Arc::new(a))
            }
            Ok(None) => ModelState::Untrained,
            Err(e) => {
                warn!(field_id = %field_id, error = %e, "Forecaster disabled for field");
                ModelState::Disabled(DisabledReason::from_error(&e))
            }
        }
    }

    /// Current state, loading lazily.
    pub fn state(&self, field_id: &str) -> Result<Arc<ModelState>, EngineError> {
        Ok(self.slot(field_id)?.load_full())
    }

    pub fn status(&self, field_id: &str) -> Result<ModelStatus, EngineError> {
        Ok(ModelStatus::from(self.state(field_id)?.as_ref()))
    }

    /// Active artifact, or the error that explains why there is none.
    pub fn active(&self, field_id: &str) -> Result<Arc<ModelArtifact>, EngineError> {
        match self.state(field_id)?.as_ref() {
            ModelState::Trained(a) => Ok(Arc::clone(a)),
            ModelState::Untrained => Err(EngineError::ModelNotAvailable(field_id.to_string())),
            ModelState::Disabled(reason) => Err(reason.to_error()),
        }
    }

    /// Re-read the artifact from disk and swap it in.
    pub fn load(&self, field_id: &str) -> Result<Arc<ModelState>, EngineError> {
        let _guard = self.write_lock.lock().map_err(|e| Self::poisoned(&e))?;
        let state = Arc::new(self.read_from_disk(field_id));
        self.slot(field_id)?.store(Arc::clone(&state));
        Ok(state)
    }

    /// Drop the in-memory slot. The next access reloads from disk.
    pub fn evict(&self, field_id: &str) -> Result<bool, EngineError> {
        let mut slots = self.slots.write().map_err(|e| Self::poisoned(&e))?;
        Ok(slots.remove(field_id).is_some())
    }

    /// Install a newly trained artifact as the active version. The version
    /// number is assigned here and always exceeds both the active and the
    /// stored version. Returns the installed artifact.
    pub fn replace(&self, mut artifact: ModelArtifact) -> Result<Arc<ModelArtifact>, EngineError> {
        let _guard = self.write_lock.lock().map_err(|e| Self::poisoned(&e))?;
        let field_id = artifact.field_id.clone();
        let slot = self.slot(&field_id)?;

        let active = match slot.load().as_ref() {
            ModelState::Trained(a) => a.version,
            ModelState::Untrained | ModelState::Disabled(_) => 0,
        };
        // A disabled or evicted field may still have a newer file on disk
        let on_disk = self
            .model_dir
            .as_ref()
            .and_then(|dir| stored_version(&artifact_path(dir, &field_id)))
            .unwrap_or(0);
        artifact.version = active.max(on_disk) + 1;
        artifact.check_compatible(&self.config)?;

        if let Some(dir) = self.model_dir.as_ref() {
            let path = artifact_path(dir, &field_id);
            save_to_disk(&artifact, &path)
                .map_err(|e| EngineError::ModelLoadError(format!("{}: {e}", path.display())))?;
        }

        let artifact = Arc::new(artifact);
        slot.store(Arc::new(ModelState::Trained(Arc::clone(&artifact))));
        info!(
            field_id = %field_id,
            version = artifact.version,
            training_days = artifact.training_days,
            "Model artifact replaced"
        );
        Ok(artifact)
    }

    /// Fields with a slot in memory.
    pub fn loaded_fields(&self) -> Vec<FieldId> {
        self.slots
            .read()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecaster::artifact::SCHEMA_VERSION;
    use crate::forecaster::features::DailyFeatures;
    use crate::forecaster::model::RainfallModel;
    use crate::forecaster::training::TrainingParams;
    use chrono::{Duration, TimeZone};

    fn config(window_days: usize) -> ForecasterConfig {
        ForecasterConfig {
            window_days,
            hidden_size: 4,
            ..ForecasterConfig::default()
        }
    }

    fn artifact(field_id: &str, config: &ForecasterConfig) -> ModelArtifact {
        let start = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let days: Vec<DailyFeatures> = (0..80)
            .map(|i| DailyFeatures {
                date: start + Duration::days(i),
                temperature: 26.0,
                humidity: 70.0,
                rainfall: if i % 5 == 0 { 8.0 } else { 0.0 },
            })
            .collect();
        let (model, report) = RainfallModel::fit(
            &days,
            config.window_days,
            config.horizon_days,
            config.hidden_size,
            config.seed,
            TrainingParams {
                epochs: 5,
                learning_rate: 0.01,
                l2_penalty: 0.0,
            },
        );
        ModelArtifact {
            schema_version: SCHEMA_VERSION,
            field_id: field_id.into(),
            version: 0,
            feature_order: ModelArtifact::feature_order(),
            window_days: config.window_days,
            horizon_days: config.horizon_days,
            hidden_size: config.hidden_size,
            seed: config.seed,
            trained_at: Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
            training_start: start,
            training_end: start + Duration::days(79),
            training_days: days.len(),
            report,
            model,
        }
    }

    #[test]
    fn test_replace_numbers_versions_from_one() {
        let registry = ModelRegistry::in_memory(config(30));
        assert_eq!(registry.status("f1").unwrap(), ModelStatus::Untrained);

        let first = registry.replace(artifact("f1", &config(30))).unwrap();
        let second = registry.replace(artifact("f1", &config(30))).unwrap();
        assert_eq!((first.version, second.version), (1, 2));
        assert_eq!(registry.active("f1").unwrap().version, 2);
    }

    #[test]
    fn test_stored_artifact_loads_lazily() {
        let dir = tempfile::tempdir().unwrap();
        ModelRegistry::new(config(30), Some(dir.path().to_path_buf()))
            .replace(artifact("f1", &config(30)))
            .unwrap();

        let fresh = ModelRegistry::new(config(30), Some(dir.path().to_path_buf()));
        assert!(fresh.loaded_fields().is_empty());
        assert_eq!(fresh.active("f1").unwrap().version, 1);
        assert_eq!(fresh.loaded_fields(), vec!["f1".to_string()]);
    }

    #[test]
    fn test_corrupt_artifact_disables_field() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(artifact_path(dir.path(), "f1"), b"{\"version\": 4, \"model\": ").unwrap();

        let registry = ModelRegistry::new(config(30), Some(dir.path().to_path_buf()));
        assert!(matches!(registry.active("f1"), Err(EngineError::ModelLoadError(_))));
        assert!(matches!(registry.status("f1").unwrap(), ModelStatus::Disabled { .. }));
    }

    #[test]
    fn test_mismatched_artifact_disables_field_until_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let old = ModelRegistry::new(config(30), Some(dir.path().to_path_buf()));
        old.replace(artifact("f1", &config(30))).unwrap();
        old.replace(artifact("f1", &config(30))).unwrap();
        old.replace(artifact("f1", &config(30))).unwrap();

        let changed = ModelRegistry::new(config(21), Some(dir.path().to_path_buf()));
        assert!(matches!(changed.active("f1"), Err(EngineError::ConfigMismatch(_))));

        // Versions keep rising past the incompatible file
        let installed = changed.replace(artifact("f1", &config(21))).unwrap();
        assert_eq!(installed.version, 4);
        assert!(changed.active("f1").is_ok());
    }

    #[test]
    fn test_evict_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(config(30), Some(dir.path().to_path_buf()));
        registry.replace(artifact("f1", &config(30))).unwrap();

        assert!(registry.evict("f1").unwrap());
        assert!(!registry.evict("f1").unwrap());
        assert!(registry.loaded_fields().is_empty());

        assert_eq!(registry.active("f1").unwrap().version, 1);
        assert_eq!(registry.replace(artifact("f1", &config(30))).unwrap().version, 2);
    }

    #[test]
    fn test_load_picks_up_file_written_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let reader = ModelRegistry::new(config(30), Some(dir.path().to_path_buf()));
        assert_eq!(reader.status("f1").unwrap(), ModelStatus::Untrained);

        ModelRegistry::new(config(30), Some(dir.path().to_path_buf()))
            .replace(artifact("f1", &config(30)))
            .unwrap();
        // The cached slot still says untrained until reloaded
        assert_eq!(reader.status("f1").unwrap(), ModelStatus::Untrained);
        assert!(matches!(reader.load("f1").unwrap().as_ref(), ModelState::Trained(a) if a.version == 1));
    }

    #[test]
    fn test_artifact_for_other_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut stray = artifact("f2", &config(30));
        stray.version = 1;
        save_to_disk(&stray, &artifact_path(dir.path(), "f1")).unwrap();

        let registry = ModelRegistry::new(config(30), Some(dir.path().to_path_buf()));
        assert!(matches!(registry.active("f1"), Err(EngineError::ModelLoadError(_))));
    }
}
