//! Recommendation Orchestrator
//!
//! `trigger` validates the field, builds its snapshot inline, opens a ticket
//! and queues the rest of the work for the worker pool. The caller gets the
//! ticket back immediately and either polls `fetch` or listens on
//! `subscribe` for the final status.
//!
//! Each trigger produces its own recommendation; concurrent triggers for the
//! same field are neither merged nor ordered.

mod pipeline;
mod tickets;

pub use tickets::{PendingTicket, TicketBoard};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::SnapshotAggregator;
use crate::config::EngineConfig;
use crate::divergence::DivergenceDetector;
use crate::error::EngineError;
use crate::forecaster::{Forecaster, ModelArtifact, ModelStatus, RainfallPredictor};
use crate::rules::RuleEngine;
use crate::storage::Persistence;
use crate::types::{FailureReason, FieldId, Recommendation, RecommendationStatus};
use crate::weather::{ForecastCache, WeatherProvider};
use pipeline::{Pipeline, WorkItem};

/// Broadcast capacity for status events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Look up by ticket or by the latest trigger for a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketRef {
    Ticket(Uuid),
    Field(FieldId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Pending(PendingTicket),
    Complete(Box<Recommendation>),
    Failed {
        reason: FailureReason,
        recommendation: Box<Recommendation>,
    },
}

impl From<Recommendation> for FetchOutcome {
    fn from(rec: Recommendation) -> Self {
        match rec.status.clone() {
            RecommendationStatus::Failed { reason } => Self::Failed {
                reason,
                recommendation: Box::new(rec),
            },
            // Stored recommendations are never pending
            RecommendationStatus::Complete | RecommendationStatus::Pending => {
                Self::Complete(Box::new(rec))
            }
        }
    }
}

/// Pushed on every ticket status transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationEvent {
    pub ticket: Uuid,
    pub field_id: FieldId,
    pub status: RecommendationStatus,
}

/// Assembles a [`RecommendationEngine`].
pub struct EngineBuilder {
    config: Arc<EngineConfig>,
    store: Arc<dyn Persistence>,
    forecaster: Arc<Forecaster>,
    predictor: Option<Arc<dyn RainfallPredictor>>,
    weather: Option<Arc<dyn WeatherProvider>>,
}

impl EngineBuilder {
    pub fn new(config: Arc<EngineConfig>, store: Arc<dyn Persistence>, forecaster: Arc<Forecaster>) -> Self {
        Self {
            config,
            store,
            forecaster,
            predictor: None,
            weather: None,
        }
    }

    /// External forecast provider for divergence checks and backfill.
    pub fn with_weather(mut self, provider: Arc<dyn WeatherProvider>) -> Self {
        self.weather = Some(provider);
        self
    }

    /// Replace the forecaster as the inference source.
    pub fn with_predictor(mut self, predictor: Arc<dyn RainfallPredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Validate the rule table and spawn the worker pool. Must be called
    /// inside a tokio runtime.
    pub fn start(self) -> Result<RecommendationEngine, EngineError> {
        let rules = RuleEngine::from_config(&self.config.rules)
            .map_err(|errors| EngineError::ValidationError(errors.join("; ")))?;
        let orchestrator = &self.config.orchestrator;
        let capacity = orchestrator.queue_capacity.max(1);
        let workers = orchestrator.workers.max(1);

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let predictor: Arc<dyn RainfallPredictor> = self
            .predictor
            .unwrap_or_else(|| Arc::clone(&self.forecaster) as Arc<dyn RainfallPredictor>);

        let pipeline = Arc::new(Pipeline {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            predictor,
            rules,
            divergence: DivergenceDetector::new(self.config.divergence.clone()),
            weather: self.weather.clone(),
            forecast_cache: ForecastCache::new(Duration::hours(orchestrator.stale_forecast_max_age_hours)),
            tickets: TicketBoard::new(),
            events: events.clone(),
        });

        let (queue, rx) = mpsc::channel::<WorkItem>(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let handles = (0..workers)
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&rx), Arc::clone(&pipeline))))
            .collect();

        info!(workers, queue_capacity = capacity, "Recommendation engine started");

        Ok(RecommendationEngine {
            aggregator: SnapshotAggregator::new(Arc::clone(&self.store), self.config.aggregator.clone()),
            config: self.config,
            store: self.store,
            forecaster: self.forecaster,
            weather: self.weather,
            pipeline,
            queue,
            capacity,
            events,
            workers: handles,
        })
    }
}

async fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>, pipeline: Arc<Pipeline>) {
    debug!(worker = id, "Recommendation worker started");
    loop {
        let item = { rx.lock().await.recv().await };
        let Some(item) = item else {
            break;
        };
        pipeline.process(item).await;
    }
    debug!(worker = id, "Recommendation worker stopped");
}

pub struct RecommendationEngine {
    config: Arc<EngineConfig>,
    store: Arc<dyn Persistence>,
    aggregator: SnapshotAggregator,
    forecaster: Arc<Forecaster>,
    weather: Option<Arc<dyn WeatherProvider>>,
    pipeline: Arc<Pipeline>,
    queue: mpsc::Sender<WorkItem>,
    capacity: usize,
    events: broadcast::Sender<RecommendationEvent>,
    workers: Vec<JoinHandle<()>>,
}

impl RecommendationEngine {
    pub fn builder(
        config: Arc<EngineConfig>,
        store: Arc<dyn Persistence>,
        forecaster: Arc<Forecaster>,
    ) -> EngineBuilder {
        EngineBuilder::new(config, store, forecaster)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }

    pub const fn forecaster(&self) -> &Arc<Forecaster> {
        &self.forecaster
    }

    /// Tickets queued or running.
    pub fn pending_count(&self) -> usize {
        self.pipeline.tickets.len()
    }

    /// Start a recommendation for `field_id` as of now.
    pub fn trigger(&self, field_id: &str) -> Result<Uuid, EngineError> {
        self.trigger_at(field_id, Utc::now())
    }

    /// Start a recommendation for `field_id` as of `at`. Fails synchronously
    /// for an unknown field or a full queue; everything else is reported
    /// through the ticket.
    pub fn trigger_at(&self, field_id: &str, at: DateTime<Utc>) -> Result<Uuid, EngineError> {
        let state = self.aggregator.build(field_id, at)?;
        let ticket = Uuid::new_v4();
        let requested_at = Utc::now();

        self.pipeline.tickets.open(PendingTicket {
            ticket,
            field_id: field_id.to_string(),
            requested_at,
        });

        let item = WorkItem {
            ticket,
            requested_at,
            state,
        };
        if let Err(e) = self.queue.try_send(item) {
            self.pipeline.tickets.close(ticket);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(field_id = %field_id, capacity = self.capacity, "Recommendation queue full");
                    EngineError::QueueFull(self.capacity)
                }
                mpsc::error::TrySendError::Closed(_) => {
                    error!(field_id = %field_id, "Recommendation workers have stopped");
                    EngineError::QueueFull(0)
                }
            });
        }

        // No subscribers is fine
        let _ = self.events.send(RecommendationEvent {
            ticket,
            field_id: field_id.to_string(),
            status: RecommendationStatus::Pending,
        });
        info!(ticket = %ticket, field_id = %field_id, "Recommendation triggered");
        Ok(ticket)
    }

    /// Status or result for a ticket, or for the newest trigger of a field.
    pub fn fetch(&self, reference: &TicketRef) -> Result<FetchOutcome, EngineError> {
        match reference {
            TicketRef::Ticket(ticket) => {
                if let Some(rec) = self.pipeline.tickets.held(*ticket) {
                    return Ok(rec.into());
                }
                if let Some(rec) = self.store.get_recommendation(*ticket)? {
                    return Ok(rec.into());
                }
                self.pipeline
                    .tickets
                    .get(*ticket)
                    .map(FetchOutcome::Pending)
                    .ok_or_else(|| EngineError::NotFound(format!("ticket {ticket}")))
            }
            TicketRef::Field(field_id) => {
                let stored = self
                    .store
                    .list_recommendations(field_id, 1)?
                    .into_iter()
                    .chain(self.pipeline.tickets.held_for_field(field_id))
                    .max_by_key(|r| r.requested_at);
                let pending = self.pipeline.tickets.latest_for_field(field_id);
                match (stored, pending) {
                    (Some(rec), Some(p)) if p.requested_at > rec.requested_at => Ok(FetchOutcome::Pending(p)),
                    (Some(rec), _) => Ok(rec.into()),
                    (None, Some(p)) => Ok(FetchOutcome::Pending(p)),
                    (None, None) => Err(EngineError::NotFound(format!(
                        "recommendation for field {field_id}"
                    ))),
                }
            }
        }
    }

    /// Wait for a ticket to leave `Pending`, polling storage between status
    /// events.
    pub async fn wait_for(&self, ticket: Uuid, timeout: std::time::Duration) -> Result<FetchOutcome, EngineError> {
        let mut events = self.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.fetch(&TicketRef::Ticket(ticket))? {
                FetchOutcome::Pending(_) => {}
                done => return Ok(done),
            }
            let wait = tokio::time::timeout_at(deadline, async {
                loop {
                    match events.recv().await {
                        Ok(e) if e.ticket == ticket => return,
                        Err(broadcast::error::RecvError::Closed) => return,
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    }
                }
            });
            if wait.await.is_err() {
                return Err(EngineError::Timeout(timeout));
            }
        }
    }

    /// Status transitions for every ticket.
    pub fn subscribe(&self) -> broadcast::Receiver<RecommendationEvent> {
        self.events.subscribe()
    }

    /// Stored recommendations for a field, newest first.
    pub fn history(&self, field_id: &str, limit: usize) -> Result<Vec<Recommendation>, EngineError> {
        if self.store.get_field(field_id)?.is_none() {
            return Err(EngineError::NotFound(format!("field {field_id}")));
        }
        let mut recs = self.store.list_recommendations(field_id, limit)?;
        let held = self.pipeline.tickets.held_for_field(field_id);
        if !held.is_empty() {
            recs.extend(held);
            recs.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
            recs.truncate(limit);
        }
        Ok(recs)
    }

    pub fn model_status(&self, field_id: &str) -> Result<ModelStatus, EngineError> {
        if self.store.get_field(field_id)?.is_none() {
            return Err(EngineError::NotFound(format!("field {field_id}")));
        }
        self.forecaster.status(field_id)
    }

    /// Train the field's model from stored history on the blocking pool.
    pub async fn train_field(&self, field_id: &str) -> Result<Arc<ModelArtifact>, EngineError> {
        if self.store.get_field(field_id)?.is_none() {
            return Err(EngineError::NotFound(format!("field {field_id}")));
        }
        let store = Arc::clone(&self.store);
        let forecaster = Arc::clone(&self.forecaster);
        let field_id = field_id.to_string();
        tokio::task::spawn_blocking(move || {
            let history = store.weather_history(&field_id)?;
            forecaster.train(&field_id, &history, Utc::now())
        })
        .await
        .map_err(|e| EngineError::ModelLoadError(format!("training task failed: {e}")))?
    }

    /// Fetch `days` of daily history ending yesterday from the weather
    /// provider and store it. Returns the number of days stored.
    pub async fn backfill_history(&self, field_id: &str, days: u32) -> Result<usize, EngineError> {
        let profile = self
            .store
            .get_field(field_id)?
            .ok_or_else(|| EngineError::NotFound(format!("field {field_id}")))?;
        let provider = self
            .weather
            .as_ref()
            .ok_or_else(|| EngineError::ForecastUnavailable("no weather provider configured".to_string()))?;

        let end = Utc::now().date_naive() - Duration::days(1);
        let start = end - Duration::days(i64::from(days.saturating_sub(1)));
        let observations = provider
            .history(field_id, profile.latitude, profile.longitude, start, end)
            .await?;

        // Skip days already on record
        let existing = self.store.weather_history(field_id)?;
        let known: std::collections::HashSet<_> =
            existing.iter().map(|o| o.timestamp.date_naive()).collect();
        let mut stored = 0;
        for obs in observations.iter().filter(|o| !known.contains(&o.timestamp.date_naive())) {
            self.store.insert_weather(obs)?;
            stored += 1;
        }
        info!(field_id = %field_id, %start, %end, stored, provider = provider.name(), "Weather history backfilled");
        Ok(stored)
    }

    /// Stop accepting work and wait for queued tickets to finish.
    pub async fn shutdown(self) {
        let Self { queue, workers, .. } = self;
        drop(queue);
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "Recommendation worker ended abnormally");
            }
        }
        info!("Recommendation engine stopped");
    }
}
