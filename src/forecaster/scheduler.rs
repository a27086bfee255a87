//! Retrain scheduler.
//!
//! Periodically walks the registered fields and retrains any whose model is
//! missing or out of date under the configured [`RetrainPolicy`]. Training
//! runs on the blocking pool; the active artifact keeps serving until the
//! new one is swapped in.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::features::{aggregate_daily, DailyFeatures};
use super::registry::ModelState;
use super::Forecaster;
use crate::config::RetrainConfig;
use crate::storage::Persistence;

/// Why a field is due for training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RetrainReason {
    /// No usable model and enough history to train one.
    Initial,
    /// Model older than the age limit with new data since.
    Aged { age_hours: i64, new_days: usize },
    /// Enough new days accumulated regardless of age.
    NewData { new_days: usize },
}

impl std::fmt::Display for RetrainReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial training"),
            Self::Aged { age_hours, new_days } => {
                write!(f, "model is {age_hours}h old with {new_days} new days")
            }
            Self::NewData { new_days } => write!(f, "{new_days} new days since training"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrainPolicy {
    pub max_model_age: chrono::Duration,
    pub min_new_observations: usize,
    pub min_training_days: usize,
}

impl RetrainPolicy {
    pub fn from_config(config: &RetrainConfig, min_training_days: usize) -> Self {
        Self {
            max_model_age: chrono::Duration::hours(config.max_model_age_hours),
            min_new_observations: config.min_new_observations,
            min_training_days,
        }
    }

    /// Decide whether the field should be (re)trained now.
    pub fn evaluate(
        &self,
        state: &ModelState,
        days: &[DailyFeatures],
        now: DateTime<Utc>,
    ) -> Option<RetrainReason> {
        match state {
            ModelState::Untrained | ModelState::Disabled(_) => {
                (days.len() >= self.min_training_days).then_some(RetrainReason::Initial)
            }
            ModelState::Trained(artifact) => {
                let new_days = days.iter().filter(|d| d.date > artifact.training_end).count();
                let age = now - artifact.trained_at;
                if new_days >= self.min_new_observations {
                    Some(RetrainReason::NewData { new_days })
                } else if new_days > 0 && age >= self.max_model_age {
                    Some(RetrainReason::Aged {
                        age_hours: age.num_hours(),
                        new_days,
                    })
                } else {
                    None
                }
            }
        }
    }
}

pub struct RetrainScheduler {
    store: Arc<dyn Persistence>,
    forecaster: Arc<Forecaster>,
    policy: RetrainPolicy,
    interval: Duration,
}

impl RetrainScheduler {
    pub fn new(store: Arc<dyn Persistence>, forecaster: Arc<Forecaster>, config: &RetrainConfig) -> Self {
        let policy = RetrainPolicy::from_config(config, forecaster.config().min_training_days);
        Self {
            store,
            forecaster,
            policy,
            interval: Duration::from_secs(config.check_interval_secs.max(1)),
        }
    }

    pub const fn policy(&self) -> &RetrainPolicy {
        &self.policy
    }

    /// One pass over every registered field. Returns the ids retrained.
    pub fn run_cycle(&self, now: DateTime<Utc>) -> Vec<String> {
        let fields = match self.store.list_fields() {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "Retrain cycle could not list fields");
                return Vec::new();
            }
        };

        let mut retrained = Vec::new();
        for field in fields {
            let history = match self.store.weather_history(&field.id) {
                Ok(h) => h,
                Err(e) => {
                    warn!(field_id = %field.id, error = %e, "Could not read weather history");
                    continue;
                }
            };
            let days = aggregate_daily(&history);
            let state = match self.forecaster.registry().state(&field.id) {
                Ok(s) => s,
                Err(e) => {
                    warn!(field_id = %field.id, error = %e, "Could not read model state");
                    continue;
                }
            };

            let Some(reason) = self.policy.evaluate(&state, &days, now) else {
                debug!(field_id = %field.id, days = days.len(), "Model up to date");
                continue;
            };

            info!(field_id = %field.id, reason = %reason, "Retraining rainfall model");
            match self.forecaster.train(&field.id, &history, now) {
                Ok(artifact) => {
                    info!(field_id = %field.id, version = artifact.version, "Retrain complete");
                    retrained.push(field.id);
                }
                Err(e) => warn!(field_id = %field.id, error = %e, "Retrain failed"),
            }
        }
        retrained
    }

    /// Run until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Retrain scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Retrain scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let this = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || this.run_cycle(Utc::now())).await {
                Ok(fields) if !fields.is_empty() => {
                    info!(count = fields.len(), "Retrain cycle finished");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Retrain cycle panicked"),
            }
        }
    }
}
