//! API error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use scribe_shared::ScribeError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    Forbidden,
    Conflict(String),
    Internal(ScribeError),
}

impl From<ScribeError> for ApiError {
    fn from(error: ScribeError) -> Self {
        match error {
            ScribeError::StateConflict { .. } => Self::Conflict(error.to_string()),
            ScribeError::MissingTranscript { .. } => Self::Conflict(error.to_string()),
            other => Self::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden".to_string()),
            Self::Conflict(message) => (StatusCode::CONFLICT, message),
            Self::Internal(inner) => {
                error!(error = %inner, "internal error serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
