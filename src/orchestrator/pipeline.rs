//! One unit of work: snapshot in, persisted recommendation out.
//!
//! External forecast fetch and model inference run concurrently. Inference
//! runs on the blocking pool under the configured timeout; on expiry the
//! recommendation is finalised as `Failed(Timeout)` and whatever the
//! blocking task later produces is dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::tickets::TicketBoard;
use super::RecommendationEvent;
use crate::config::EngineConfig;
use crate::divergence::DivergenceDetector;
use crate::error::EngineError;
use crate::forecaster::RainfallPredictor;
use crate::rules::RuleEngine;
use crate::storage::Persistence;
use crate::types::{
    ActionPlan, ConfidenceLevel, ExternalForecast, ExternalForecastStatus, Explanation,
    FailureReason, FieldState, ForecastInput, ForecastPoint, ForecastSource, ForecastVector, Modality,
    Recommendation, RecommendationStatus, WeatherKind,
};
use crate::weather::{ForecastCache, WeatherProvider};

/// Writes attempted before a recommendation is held in memory instead.
const PERSIST_ATTEMPTS: u32 = 3;

/// First retry delay; doubles each attempt.
const PERSIST_INITIAL_DELAY_MS: u64 = 20;

/// Queued work for one ticket.
#[derive(Debug)]
pub struct WorkItem {
    pub ticket: Uuid,
    pub requested_at: DateTime<Utc>,
    pub state: FieldState,
}

/// Outcome of the inference step.
enum Inference {
    Forecast(ForecastVector),
    Unavailable(EngineError),
    TimedOut(Duration),
    Crashed(String),
}

/// Everything a worker needs, shared behind one `Arc`.
pub struct Pipeline {
    pub config: Arc<EngineConfig>,
    pub store: Arc<dyn Persistence>,
    pub predictor: Arc<dyn RainfallPredictor>,
    pub rules: RuleEngine,
    pub divergence: DivergenceDetector,
    pub weather: Option<Arc<dyn WeatherProvider>>,
    pub forecast_cache: ForecastCache,
    pub tickets: TicketBoard,
    pub events: broadcast::Sender<RecommendationEvent>,
}

impl Pipeline {
    /// Run a ticket to completion and persist the result.
    pub async fn process(&self, item: WorkItem) {
        let started = Instant::now();
        let ticket = item.ticket;
        let field_id = item.state.profile.id.clone();

        let (inference, (external, external_status)) =
            tokio::join!(self.infer(&item.state), self.external_forecast(&item.state));

        let rec = match inference {
            Inference::TimedOut(after) => {
                warn!(ticket = %ticket, field_id = %field_id, after_ms = duration_ms(after), "Inference timed out");
                self.failed(&item, FailureReason::Timeout { after_ms: duration_ms(after) }, external, external_status)
            }
            Inference::Crashed(message) => {
                error!(ticket = %ticket, field_id = %field_id, error = %message, "Inference task failed");
                self.failed(&item, FailureReason::Error { message }, external, external_status)
            }
            Inference::Forecast(vector) => self.assemble(&item, Ok(vector), external, external_status),
            Inference::Unavailable(err) => self.assemble(&item, Err(err), external, external_status),
        };

        let persisted = self.persist(&rec).await;
        let rec = match persisted {
            Ok(()) => {
                self.tickets.close(ticket);
                rec
            }
            Err(e) => {
                error!(ticket = %ticket, field_id = %field_id, error = %e, "Recommendation not persisted, holding in memory");
                let rec = unpersisted(rec, &e);
                self.tickets.hold(rec.clone());
                rec
            }
        };
        // No subscribers is fine
        let _ = self.events.send(RecommendationEvent {
            ticket,
            field_id: field_id.clone(),
            status: rec.status.clone(),
        });

        info!(
            ticket = %ticket,
            field_id = %field_id,
            status = ?rec.status,
            confidence = ?rec.confidence,
            alerts = rec.risk_alerts.len(),
            elapsed_ms = duration_ms(started.elapsed()),
            "Recommendation finalised"
        );
    }

    /// Write the recommendation, retrying with exponential backoff.
    async fn persist(&self, rec: &Recommendation) -> Result<(), EngineError> {
        let mut delay = Duration::from_millis(PERSIST_INITIAL_DELAY_MS);
        let mut attempt = 1;
        loop {
            match self.store.put_recommendation(rec) {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= PERSIST_ATTEMPTS => return Err(e.into()),
                Err(e) => {
                    warn!(ticket = %rec.id, attempt, error = %e, "Persisting recommendation failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Model inference on the blocking pool, bounded by the configured
    /// timeout. History is read inside the blocking task.
    async fn infer(&self, state: &FieldState) -> Inference {
        let fc = &self.config.forecaster;
        let timeout = fc.inference_timeout();
        let lookback_days = i64::try_from(fc.window_days).unwrap_or(i64::MAX / 2) + fc.max_input_lag_days + 1;

        let store = Arc::clone(&self.store);
        let predictor = Arc::clone(&self.predictor);
        let field_id = state.profile.id.clone();
        let at = state.reference_time;

        let task = tokio::task::spawn_blocking(move || {
            let from = at - chrono::Duration::days(lookback_days);
            let history = store.weather_range(&field_id, WeatherKind::Historical, from, at)?;
            predictor.predict(&field_id, &history, at.date_naive())
        });

        match tokio::time::timeout(timeout, task).await {
            Err(_) => Inference::TimedOut(timeout),
            Ok(Err(join)) => Inference::Crashed(join.to_string()),
            Ok(Ok(Ok(vector))) => Inference::Forecast(vector),
            Ok(Ok(Err(e))) => {
                debug!(field_id = %state.profile.id, error = %e, "Internal forecast unavailable");
                Inference::Unavailable(e)
            }
        }
    }

    /// Provider forecast, falling back to the last good copy.
    async fn external_forecast(&self, state: &FieldState) -> (Option<ExternalForecast>, ExternalForecastStatus) {
        let Some(provider) = self.weather.as_ref() else {
            return (
                None,
                ExternalForecastStatus::Unavailable {
                    reason: "no weather provider configured".to_string(),
                },
            );
        };

        let profile = &state.profile;
        let horizon = u32::try_from(self.config.forecaster.horizon_days).unwrap_or(u32::MAX);
        let timeout = Duration::from_millis(self.config.orchestrator.external_forecast_timeout_ms);

        let fetched = match tokio::time::timeout(
            timeout,
            provider.forecast(profile.latitude, profile.longitude, horizon),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::ForecastUnavailable(format!(
                "{} did not answer within {} ms",
                provider.name(),
                duration_ms(timeout)
            ))),
        };

        let now = Utc::now();
        match fetched {
            Ok(days) => {
                let forecast = ExternalForecast { fetched_at: now, days };
                self.forecast_cache.store(&profile.id, forecast.clone());
                (Some(forecast), ExternalForecastStatus::Live)
            }
            Err(e) => {
                warn!(field_id = %profile.id, provider = provider.name(), error = %e, "External forecast failed");
                match self.forecast_cache.last_good(&profile.id, now) {
                    Some(cached) => {
                        let fetched_at = cached.forecast.fetched_at;
                        (Some(cached.forecast), ExternalForecastStatus::Stale { fetched_at })
                    }
                    None => (None, ExternalForecastStatus::Unavailable { reason: e.to_string() }),
                }
            }
        }
    }

    fn assemble(
        &self,
        item: &WorkItem,
        internal: Result<ForecastVector, EngineError>,
        external: Option<ExternalForecast>,
        external_status: ExternalForecastStatus,
    ) -> Recommendation {
        let state = &item.state;
        let (forecast_input, forecast_source) = match &internal {
            Ok(v) => (
                ForecastInput::Available(v),
                ForecastSource::Model {
                    version: v.model_version.unwrap_or_default(),
                },
            ),
            Err(e) => (
                ForecastInput::NotAvailable { reason: e.to_string() },
                ForecastSource::NotAvailable { reason: e.to_string() },
            ),
        };

        let (action_plan, explanation) = self.rules.evaluate(state, &forecast_input);

        let risk_alerts = match (&internal, &external) {
            (Ok(ours), Some(theirs)) => self
                .divergence
                .detect(ours, &rebase(theirs, state.reference_time.date_naive())),
            _ => Vec::new(),
        };

        let degradations = degradations(state, internal.as_ref().err(), &action_plan);
        let confidence = if degradations.is_empty() {
            ConfidenceLevel::Full
        } else {
            ConfidenceLevel::Partial
        };

        Recommendation {
            id: item.ticket,
            field_id: state.profile.id.clone(),
            requested_at: item.requested_at,
            completed_at: Utc::now(),
            status: RecommendationStatus::Complete,
            action_plan,
            explanation,
            risk_alerts,
            completeness: state.completeness.clone(),
            confidence,
            degradations,
            forecast_source,
            internal_forecast: internal.as_ref().ok().cloned(),
            external_forecast: external,
            external_status,
        }
    }

    fn failed(
        &self,
        item: &WorkItem,
        reason: FailureReason,
        external: Option<ExternalForecast>,
        external_status: ExternalForecastStatus,
    ) -> Recommendation {
        let mut explanation = Explanation::new();
        explanation.push(format!(
            "Recommendation could not be completed: rainfall forecast {reason}; no action plan was produced"
        ));
        Recommendation {
            id: item.ticket,
            field_id: item.state.profile.id.clone(),
            requested_at: item.requested_at,
            completed_at: Utc::now(),
            status: RecommendationStatus::Failed {
                reason: reason.clone(),
            },
            action_plan: ActionPlan::default(),
            explanation,
            risk_alerts: Vec::new(),
            completeness: item.state.completeness.clone(),
            confidence: ConfidenceLevel::Partial,
            degradations: vec![format!("inference {reason}")],
            forecast_source: ForecastSource::NotAvailable {
                reason: reason.to_string(),
            },
            internal_forecast: None,
            external_forecast: external,
            external_status,
        }
    }
}

/// Mark a recommendation storage refused as failed, keeping its plan for
/// the caller.
fn unpersisted(mut rec: Recommendation, error: &EngineError) -> Recommendation {
    let reason = FailureReason::Error {
        message: format!("recommendation could not be persisted: {error}"),
    };
    rec.explanation
        .push(format!("Recommendation was not saved and will be lost on restart: {error}"));
    rec.degradations.push(reason.to_string());
    rec.confidence = ConfidenceLevel::Partial;
    rec.status = RecommendationStatus::Failed { reason };
    rec
}

/// Reasons a recommendation is not full-confidence.
fn degradations(state: &FieldState, forecast_error: Option<&EngineError>, plan: &ActionPlan) -> Vec<String> {
    let mut out = Vec::new();
    for modality in &state.completeness.missing {
        out.push(match modality {
            Modality::Sensor => "no recent soil sensor reading".to_string(),
            Modality::Weather => "no recent weather observation".to_string(),
            Modality::Image => "no recent crop image".to_string(),
        });
    }
    if let Some(e) = forecast_error {
        out.push(format!("internal rainfall forecast unavailable: {e}"));
    }
    if plan.irrigation.as_ref().is_some_and(|i| i.rain_assumed) {
        out.push("irrigation decision assumes 0 mm rainfall".to_string());
    }
    out
}

/// External days keyed by offset from `reference`, so a cached forecast
/// fetched on an earlier day still lines up with the internal vector.
fn rebase(external: &ExternalForecast, reference: NaiveDate) -> ForecastVector {
    let points = external
        .days
        .iter()
        .filter_map(|d| {
            let offset = u32::try_from((d.date - reference).num_days()).ok()?;
            (offset > 0).then_some(ForecastPoint {
                day_offset: offset,
                rainfall_mm: d.rainfall_mm,
            })
        })
        .collect();
    ForecastVector {
        points,
        model_version: None,
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
