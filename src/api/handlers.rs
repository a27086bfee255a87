//! v2 API handlers.
//!
//! All handlers return `Response` via [`ApiResponse`] or [`ApiErrorResponse`].
//! Engine errors are mapped to status codes in one place,
//! [`ApiErrorResponse::from_engine`].

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::feedback::FeedbackTracker;
use crate::ingest::Ingestor;
use crate::orchestrator::{FetchOutcome, RecommendationEngine, TicketRef};
use crate::types::{
    CropType, FailureReason, FieldId, FieldProfile, GrowthStage, ImageMeta, ImageSource,
    Recommendation, SensorSample, WeatherKind, WeatherObservation,
};

/// Default and maximum page size for recommendation history.
const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 200;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<RecommendationEngine>,
    pub ingestor: Arc<Ingestor>,
    pub feedback: Arc<FeedbackTracker>,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(engine: Arc<RecommendationEngine>) -> Self {
        let store = Arc::clone(engine.store());
        Self {
            engine,
            ingestor: Arc::new(Ingestor::new(Arc::clone(&store))),
            feedback: Arc::new(FeedbackTracker::new(store)),
            started_at: Instant::now(),
        }
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw).map_err(|_| ApiErrorResponse::bad_request(format!("invalid ticket id: {raw}")))
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterFieldRequest {
    #[serde(default)]
    pub name: String,
    pub crop: String,
    pub stage: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub area_acres: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SensorRequest {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub moisture: f64,
    pub ph: f64,
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
}

#[derive(Debug, Deserialize)]
pub struct WeatherEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_weather_kind")]
    pub kind: WeatherKind,
    pub temperature: f64,
    pub humidity: f64,
    pub rainfall: f64,
}

const fn default_weather_kind() -> WeatherKind {
    WeatherKind::Historical
}

#[derive(Debug, Deserialize)]
pub struct WeatherBatchRequest {
    pub observations: Vec<WeatherEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub uri: String,
    pub source: ImageSource,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub followed: bool,
    pub outcome: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub field_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub pending_tickets: usize,
}

#[derive(Debug, Serialize)]
pub struct TicketAccepted {
    pub ticket: Uuid,
    pub field_id: FieldId,
    pub status_url: String,
}

#[derive(Debug, Serialize)]
pub struct IngestAccepted {
    pub field_id: FieldId,
    pub stored: usize,
}

/// Polling view of a ticket: `pending`, `complete` or `failed`.
#[derive(Debug, Serialize)]
pub struct TicketView {
    pub state: &'static str,
    pub ticket: Uuid,
    pub field_id: FieldId,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
}

impl From<FetchOutcome> for TicketView {
    fn from(outcome: FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Pending(p) => Self {
                state: "pending",
                ticket: p.ticket,
                field_id: p.field_id,
                requested_at: p.requested_at,
                failure: None,
                recommendation: None,
            },
            FetchOutcome::Complete(rec) => Self {
                state: "complete",
                ticket: rec.id,
                field_id: rec.field_id.clone(),
                requested_at: rec.requested_at,
                failure: None,
                recommendation: Some(*rec),
            },
            FetchOutcome::Failed { reason, recommendation } => Self {
                state: "failed",
                ticket: recommendation.id,
                field_id: recommendation.field_id.clone(),
                requested_at: recommendation.requested_at,
                failure: Some(reason),
                recommendation: Some(*recommendation),
            },
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v2/health
pub async fn health(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        pending_tickets: state.engine.pending_count(),
    })
}

/// PUT /api/v2/fields/:field_id: create or update a field profile.
pub async fn register_field(
    State(state): State<ApiState>,
    Path(field_id): Path<String>,
    axum::Json(body): axum::Json<RegisterFieldRequest>,
) -> Response {
    let registered_at = match state.engine.store().get_field(&field_id) {
        Ok(existing) => existing.map_or_else(Utc::now, |f| f.registered_at),
        Err(e) => return ApiErrorResponse::internal(e.to_string()),
    };
    let profile = FieldProfile {
        id: field_id,
        name: body.name,
        crop: CropType::parse_lenient(&body.crop),
        stage: GrowthStage::parse_lenient(&body.stage),
        latitude: body.latitude,
        longitude: body.longitude,
        area_acres: body.area_acres.unwrap_or(1.0),
        registered_at,
    };
    match state.ingestor.register_field(&profile) {
        Ok(()) => ApiResponse::ok(profile),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// POST /api/v2/fields/:field_id/sensor
pub async fn ingest_sensor(
    State(state): State<ApiState>,
    Path(field_id): Path<String>,
    axum::Json(body): axum::Json<SensorRequest>,
) -> Response {
    let sample = SensorSample {
        field_id: field_id.clone(),
        timestamp: body.timestamp.unwrap_or_else(Utc::now),
        moisture: body.moisture,
        ph: body.ph,
        nitrogen: body.nitrogen,
        phosphorus: body.phosphorus,
        potassium: body.potassium,
    };
    match state.ingestor.sensor(&field_id, &sample) {
        Ok(()) => ApiResponse::created(IngestAccepted { field_id, stored: 1 }),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// POST /api/v2/fields/:field_id/weather: batch of observations, all or nothing.
pub async fn ingest_weather(
    State(state): State<ApiState>,
    Path(field_id): Path<String>,
    axum::Json(body): axum::Json<WeatherBatchRequest>,
) -> Response {
    if body.observations.is_empty() {
        return ApiErrorResponse::bad_request("observations must not be empty");
    }
    let batch: Vec<WeatherObservation> = body
        .observations
        .into_iter()
        .map(|o| WeatherObservation {
            field_id: field_id.clone(),
            timestamp: o.timestamp,
            kind: o.kind,
            temperature: o.temperature,
            humidity: o.humidity,
            rainfall: o.rainfall,
        })
        .collect();
    match state.ingestor.weather(&field_id, &batch) {
        Ok(stored) => ApiResponse::created(IngestAccepted { field_id, stored }),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// POST /api/v2/fields/:field_id/images
pub async fn ingest_image(
    State(state): State<ApiState>,
    Path(field_id): Path<String>,
    axum::Json(body): axum::Json<ImageRequest>,
) -> Response {
    let image = ImageMeta {
        field_id: field_id.clone(),
        timestamp: body.timestamp.unwrap_or_else(Utc::now),
        uri: body.uri,
        source: body.source,
        notes: body.notes,
    };
    match state.ingestor.image(&field_id, &image) {
        Ok(()) => ApiResponse::created(IngestAccepted { field_id, stored: 1 }),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// POST /api/v2/fields/:field_id/recommendations: returns a ticket immediately.
pub async fn trigger_recommendation(State(state): State<ApiState>, Path(field_id): Path<String>) -> Response {
    match state.engine.trigger(&field_id) {
        Ok(ticket) => ApiResponse::accepted(TicketAccepted {
            ticket,
            field_id,
            status_url: format!("/api/v2/recommendations/{ticket}"),
        }),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// GET /api/v2/recommendations/:ticket
pub async fn get_recommendation(State(state): State<ApiState>, Path(ticket): Path<String>) -> Response {
    let ticket = match parse_uuid(&ticket) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    match state.engine.fetch(&TicketRef::Ticket(ticket)) {
        Ok(outcome) => ApiResponse::ok(TicketView::from(outcome)),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// GET /api/v2/fields/:field_id/recommendations/latest
pub async fn latest_recommendation(State(state): State<ApiState>, Path(field_id): Path<String>) -> Response {
    match state.engine.fetch(&TicketRef::Field(field_id)) {
        Ok(outcome) => ApiResponse::ok(TicketView::from(outcome)),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// GET /api/v2/fields/:field_id/recommendations?limit=N: newest first.
pub async fn recommendation_history(
    State(state): State<ApiState>,
    Path(field_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    match state.engine.history(&field_id, limit) {
        Ok(recs) => ApiResponse::ok(recs),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// GET /api/v2/fields/:field_id/model
pub async fn model_status(State(state): State<ApiState>, Path(field_id): Path<String>) -> Response {
    match state.engine.model_status(&field_id) {
        Ok(status) => ApiResponse::ok(status),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// POST /api/v2/fields/:field_id/model/train: train now from stored history.
pub async fn train_model(State(state): State<ApiState>, Path(field_id): Path<String>) -> Response {
    if let Err(e) = state.engine.train_field(&field_id).await {
        return ApiErrorResponse::from_engine(&e);
    }
    match state.engine.model_status(&field_id) {
        Ok(status) => ApiResponse::ok(status),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// POST /api/v2/recommendations/:ticket/feedback
pub async fn submit_feedback(
    State(state): State<ApiState>,
    Path(ticket): Path<String>,
    axum::Json(body): axum::Json<FeedbackRequest>,
) -> Response {
    let id = match parse_uuid(&ticket) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    match state
        .feedback
        .submit(id, body.followed, &body.outcome, body.notes.as_deref())
    {
        Ok(record) => ApiResponse::created(record),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// GET /api/v2/recommendations/:ticket/feedback
pub async fn list_feedback(State(state): State<ApiState>, Path(ticket): Path<String>) -> Response {
    let id = match parse_uuid(&ticket) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    match state.feedback.for_recommendation(id) {
        Ok(records) => ApiResponse::ok(records),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// GET /api/v2/feedback/stats?field_id=...
pub async fn feedback_stats(State(state): State<ApiState>, Query(query): Query<StatsQuery>) -> Response {
    match state.feedback.stats(query.field_id.as_deref()) {
        Ok(stats) => ApiResponse::ok(stats),
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}
