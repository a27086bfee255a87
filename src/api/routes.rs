//! v2 route table.

use axum::routing::{get, post, put};
use axum::Router;

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Fields and ingestion
        .route("/fields/:field_id", put(handlers::register_field))
        .route("/fields/:field_id/sensor", post(handlers::ingest_sensor))
        .route("/fields/:field_id/weather", post(handlers::ingest_weather))
        .route("/fields/:field_id/images", post(handlers::ingest_image))
        // Recommendations
        .route(
            "/fields/:field_id/recommendations",
            post(handlers::trigger_recommendation).get(handlers::recommendation_history),
        )
        .route("/fields/:field_id/recommendations/latest", get(handlers::latest_recommendation))
        .route("/recommendations/:ticket", get(handlers::get_recommendation))
        // Model lifecycle
        .route("/fields/:field_id/model", get(handlers::model_status))
        .route("/fields/:field_id/model/train", post(handlers::train_model))
        // Feedback
        .route(
            "/recommendations/:ticket/feedback",
            post(handlers::submit_feedback).get(handlers::list_feedback),
        )
        .route("/feedback/stats", get(handlers::feedback_stats))
        .with_state(state)
}
