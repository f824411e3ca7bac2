//! # HTTP API
//!
//! The task control surface plus the SSE stream endpoint. Authentication is
//! out of scope: the ingress proxy injects the authenticated owner id in the
//! `X-User-Id` header and every handler scopes its queries by it.

pub mod error;
pub mod stream;
pub mod tasks;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use scribe_shared::bus::EventBus;
use scribe_shared::config::ScribeConfig;
use scribe_shared::store::TaskStore;

use crate::broadcaster::Broadcaster;
use error::ApiError;

/// Shared state handed to every handler.
#[derive(Debug)]
pub struct ApiState {
    pub config: ScribeConfig,
    pub store: TaskStore,
    pub bus: EventBus,
    pub broadcaster: Arc<Broadcaster>,
}

/// Build the service router.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/healthz", get(tasks::health))
        .route("/v1/tasks", post(tasks::create_task))
        .route(
            "/v1/tasks/{id}",
            get(tasks::get_task).delete(tasks::delete_task),
        )
        .route("/v1/tasks/{id}/cancel", post(tasks::cancel_task))
        .route("/v1/tasks/{id}/resummarize", post(tasks::resummarize_task))
        .route("/v1/tasks/{id}/stream", get(stream::stream_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Owner id injected by the ingress proxy.
pub(crate) fn owner_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(String::from)
        .ok_or_else(|| ApiError::BadRequest("missing X-User-Id header".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn owner_header_is_required() {
        let headers = HeaderMap::new();
        assert!(owner_from_headers(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static(""));
        assert!(owner_from_headers(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("user-1"));
        assert_eq!(owner_from_headers(&headers).unwrap(), "user-1");
    }
}
