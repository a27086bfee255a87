//! Consistent response envelope for all v2 API endpoints.
//!
//! Every v2 response is wrapped in either [`ApiResponse`] (success) or
//! [`ApiErrorResponse`] (error), ensuring a uniform JSON shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

use crate::error::EngineError;

/// Metadata included in every v2 response.
#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
    pub version: &'static str,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: "2",
        }
    }
}

/// Successful v2 response: `{ "data": T, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    fn with_status(status: StatusCode, data: T) -> Response {
        let body = Self {
            data,
            meta: ResponseMeta::default(),
        };
        (status, axum::Json(body)).into_response()
    }

    pub fn ok(data: T) -> Response {
        Self::with_status(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Response {
        Self::with_status(StatusCode::CREATED, data)
    }

    /// Work queued; the body says where to look for the result.
    pub fn accepted(data: T) -> Response {
        Self::with_status(StatusCode::ACCEPTED, data)
    }
}

/// Error detail inside [`ApiErrorResponse`].
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Error v2 response: `{ "error": { "code": "...", "message": "..." }, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
    pub meta: ResponseMeta,
}

impl ApiErrorResponse {
    fn build(status: StatusCode, code: &str, msg: impl Into<String>) -> Response {
        let body = Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: msg.into(),
            },
            meta: ResponseMeta::default(),
        };
        (status, axum::Json(body)).into_response()
    }

    pub fn not_found(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::NOT_FOUND, "NOT_FOUND", msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
    }

    pub fn internal(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
    }

    /// Map an engine error onto a status code and stable error code.
    pub fn from_engine(err: &EngineError) -> Response {
        let msg = err.to_string();
        match err {
            EngineError::NotFound(_) => Self::not_found(msg),
            EngineError::ValidationError(_) => Self::build(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            EngineError::InsufficientData(_) => {
                Self::build(StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_DATA", msg)
            }
            EngineError::ModelNotAvailable(_) => Self::build(StatusCode::CONFLICT, "MODEL_NOT_AVAILABLE", msg),
            EngineError::ConfigMismatch(_) | EngineError::ModelLoadError(_) => {
                Self::build(StatusCode::CONFLICT, "MODEL_DISABLED", msg)
            }
            EngineError::ForecastUnavailable(_) => Self::build(StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE", msg),
            EngineError::Timeout(_) => Self::build(StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg),
            EngineError::QueueFull(_) => Self::service_unavailable(msg),
            EngineError::Storage(_) => Self::internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ok_response_shape() {
        let resp = ApiResponse::ok(serde_json::json!({"hello": "world"}));
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(v.get("data").is_some());
        assert!(v.get("meta").is_some());
        assert_eq!(v["meta"]["version"], "2");
    }

    #[tokio::test]
    async fn test_error_response_shape() {
        let resp = ApiErrorResponse::not_found("gone");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["error"]["code"], "NOT_FOUND");
        assert_eq!(v["error"]["message"], "gone");
    }

    #[test]
    fn test_engine_error_status_mapping() {
        let cases = [
            (EngineError::NotFound("field x".into()), StatusCode::NOT_FOUND),
            (EngineError::ValidationError("bad".into()), StatusCode::BAD_REQUEST),
            (EngineError::InsufficientData("short".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (EngineError::QueueFull(8), StatusCode::SERVICE_UNAVAILABLE),
            (EngineError::ConfigMismatch("window".into()), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(ApiErrorResponse::from_engine(&err).status(), status, "{err}");
        }
    }
}
