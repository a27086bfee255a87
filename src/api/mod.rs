//! REST API module using Axum
//!
//! Everything lives under `/api/v2` and answers with the envelope from
//! [`envelope`]. Recommendation triggers return `202 Accepted` with a ticket
//! the client polls.

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::ApiState;

use axum::http::{header, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted request body. Weather batches are the biggest payloads.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Build a CORS layer that is restrictive by default (same-origin only).
///
/// Set `ROOTSPHERE_CORS_ORIGINS` to a comma-separated list of allowed
/// origins for the farmer app or a local dev server.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    match std::env::var("ROOTSPHERE_CORS_ORIGINS") {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Create the complete application router.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .nest("/api/v2", routes::api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(build_cors_layer())
}
