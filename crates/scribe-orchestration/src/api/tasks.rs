//! # Task Control Handlers
//!
//! Each operation is defined by the invariant it enforces against the store:
//! create inserts the pending task and its STT outbox row in one
//! transaction; cancel is a conditional owner-scoped update followed by the
//! cancellation broadcast; re-summarize transactionally requires a stored
//! transcript and the `completed→processing` transition.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use scribe_shared::messaging::{TaskMessage, TaskOptions};
use scribe_shared::models::{Task, TaskState};
use scribe_shared::store::CancelOutcome;

use super::error::ApiError;
use super::{owner_from_headers, ApiState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub file_path: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub stt_model: Option<String>,
    #[serde(default)]
    pub summary_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResponse {
    pub task_id: Uuid,
}

pub async fn create_task(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    let owner = owner_from_headers(&headers)?;
    if request.file_path.is_empty() {
        return Err(ApiError::BadRequest("filePath must not be empty".into()));
    }

    let task_id = Uuid::now_v7();
    let options = TaskOptions {
        language: request.language,
        stt_model: request.stt_model,
        summary_prompt: request.summary_prompt,
    };
    let message = TaskMessage::stt(task_id, &owner, &request.file_path, options);

    state
        .store
        .create_task_with_outbox(task_id, &owner, &request.file_path, &message)
        .await?;
    state.bus.record_owner(task_id, &owner).await?;

    info!(task_id = %task_id, owner = %owner, "task created");
    Ok((StatusCode::CREATED, Json(CreateTaskResponse { task_id })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub task_id: Uuid,
    pub status: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TaskView {
    fn new(task: Task, transcript: Option<String>, summary: Option<String>) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            error_message: task.error_message,
            transcript,
            summary,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

pub async fn get_task(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<TaskView>, ApiError> {
    let owner = owner_from_headers(&headers)?;

    let task = state
        .store
        .get_owned_task(task_id, &owner)
        .await?
        .ok_or(ApiError::NotFound)?;

    let result = state.store.get_result(task_id).await?;
    let (transcript, summary) = match result {
        Some(result) => (
            (!result.transcript.is_empty()).then_some(result.transcript),
            (!result.summary.is_empty()).then_some(result.summary),
        ),
        None => (None, None),
    };

    Ok(Json(TaskView::new(task, transcript, summary)))
}

pub async fn cancel_task(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let owner = owner_from_headers(&headers)?;

    match state.store.cancel_owned(task_id, &owner).await? {
        CancelOutcome::NotFound => Err(ApiError::NotFound),
        CancelOutcome::NotCancellable => Err(ApiError::Conflict(
            "task already reached a terminal state".to_string(),
        )),
        CancelOutcome::Cancelled => {
            // Wake the worker's cancellation listener; the DB row is already
            // terminal, so a lost signal only delays the in-flight abort.
            if let Err(error) = state.bus.publish_cancel(task_id).await {
                warn!(task_id = %task_id, error = %error, "cancel signal publish failed");
            }
            info!(task_id = %task_id, "task cancelled");
            Ok(StatusCode::ACCEPTED)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResummarizeRequest {
    pub summary_prompt: Option<String>,
}

pub async fn resummarize_task(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<Uuid>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<StatusCode, ApiError> {
    let owner = owner_from_headers(&headers)?;

    // The body is optional; an empty POST re-summarizes with the stored
    // transcript and the default prompt.
    let request: ResummarizeRequest = if body.is_empty() {
        ResummarizeRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|error| ApiError::BadRequest(format!("invalid body: {error}")))?
    };
    let options = TaskOptions {
        summary_prompt: request.summary_prompt,
        ..Default::default()
    };

    state.store.resummarize(task_id, &owner, options).await?;

    info!(task_id = %task_id, "re-summarization enqueued");
    Ok(StatusCode::ACCEPTED)
}

pub async fn delete_task(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let owner = owner_from_headers(&headers)?;

    if !state.store.delete_task(task_id, &owner).await? {
        return Err(ApiError::NotFound);
    }
    state.bus.clear_task_keys(task_id).await?;

    info!(task_id = %task_id, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub database: &'static str,
    pub redis: &'static str,
}

pub async fn health(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<HealthReport>, StatusCode> {
    let database = state.store.ping().await.is_ok();
    let redis = state.bus.ping().await.is_ok();

    if database && redis {
        Ok(Json(HealthReport {
            database: "ok",
            redis: "ok",
        }))
    } else {
        warn!(database, redis, "health check failing");
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
