use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Domain errors raised by the mutating A/B test operations and link CRUD.
///
/// All three are translated at the HTTP boundary into an
/// `{"error": message}` JSON body with status 400; storage failures carry
/// the underlying driver message through unchanged.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("link not found")]
    NotFound,

    #[error("free tier allows only one A/B test running at a time")]
    TierLimitExceeded,

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Persistence(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Persistence(ref e) = self {
            tracing::error!("storage error: {:?}", e);
        }
        let body = Json(json!({ "error": self.to_string() }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}
