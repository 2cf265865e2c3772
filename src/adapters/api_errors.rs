use crate::domain::error::PipelineError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Newtype so the domain error can implement axum's `IntoResponse`.
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self.0 {
            PipelineError::Authenticity(reason) => (
                StatusCode::UNAUTHORIZED,
                "authenticity_error",
                reason.as_str().to_string(),
            ),
            PipelineError::MalformedEvent(msg) => {
                (StatusCode::BAD_REQUEST, "malformed_event", msg.clone())
            }
            PipelineError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                msg.clone(),
            ),
            PipelineError::MatchNotFound(msg) => {
                (StatusCode::NOT_FOUND, "match_not_found", msg.clone())
            }
            PipelineError::ConcurrencyConflict { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "concurrency_conflict",
                "payment is busy, retry later".to_string(),
            ),
            PipelineError::ProviderUnavailable(msg) => {
                tracing::warn!("provider unavailable: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "provider_unavailable",
                    "payment provider unavailable".to_string(),
                )
            }
            PipelineError::Database(err) => {
                tracing::error!("database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
            PipelineError::Serialization(err) => {
                tracing::error!("serialization error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
