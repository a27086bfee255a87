//! RootSphere: hybrid recommendation engine for irrigation and fertilizer advice
//!
//! Per-field sensor, weather and image records are fused into a snapshot,
//! a per-field rainfall forecaster predicts the next few days, and a
//! deterministic rule table turns both into an explained action plan.
//!
//! ## Architecture
//!
//! - **Ingest**: validates sensor, weather and image payloads before storage
//! - **Aggregator**: builds a `FieldState` snapshot with a completeness score
//! - **Forecaster**: continuous-time recurrent encoder with a trained readout
//! - **Rules**: crop and stage keyed irrigation and fertilizer rules
//! - **Divergence**: flags days where internal and external forecasts disagree
//! - **Orchestrator**: ticketed, asynchronous recommendation pipeline
//! - **Feedback**: append-only farmer feedback with summary counters

pub mod aggregator;
pub mod api;
pub mod config;
pub mod divergence;
pub mod error;
pub mod feedback;
pub mod forecaster;
pub mod ingest;
pub mod orchestrator;
pub mod rules;
pub mod storage;
pub mod types;
pub mod weather;

pub use config::EngineConfig;
pub use error::EngineError;

pub use types::{
    ActionPlan, CompletenessScore, ConfidenceLevel, CropType, FieldProfile, FieldState,
    ForecastVector, GrowthStage, ImageMeta, Recommendation, RecommendationStatus, RiskAlert,
    SensorSample, WeatherObservation,
};

pub use aggregator::SnapshotAggregator;
pub use divergence::DivergenceDetector;
pub use feedback::FeedbackTracker;
pub use forecaster::{Forecaster, ModelRegistry, RainfallPredictor, RetrainScheduler};
pub use ingest::Ingestor;
pub use orchestrator::{EngineBuilder, FetchOutcome, RecommendationEngine, TicketRef};
pub use rules::RuleEngine;
pub use storage::{InMemoryStore, Persistence, SledStore, StorageError};
pub use weather::{OpenMeteoClient, WeatherProvider};
