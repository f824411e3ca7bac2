//! # Stream Endpoint
//!
//! Long-lived SSE stream of a task's progress. Ordering matters here:
//! registration with the broadcaster happens **before** the replay buffers
//! are read, closing the race where an event fires between reading the
//! replay and subscribing. The replayed transcript/summary are emitted
//! first, then live events flow until the client disconnects; a drop guard
//! releases the listener slot on any exit path.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use scribe_shared::events::ProgressEvent;

use crate::broadcaster::Broadcaster;

use super::error::ApiError;
use super::{owner_from_headers, ApiState};

/// Releases the broadcaster slot when the SSE stream is dropped.
struct ListenerGuard {
    broadcaster: Arc<Broadcaster>,
    task_id: Uuid,
    listener_id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.task_id, self.listener_id);
    }
}

fn encode(event: &ProgressEvent) -> Result<String, ApiError> {
    serde_json::to_string(event).map_err(|error| ApiError::Internal(error.into()))
}

pub async fn stream_task(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let owner = owner_from_headers(&headers)?;

    // Authorize against the ownership record.
    match state.bus.owner_of(task_id).await? {
        None => return Err(ApiError::NotFound),
        Some(stored) if stored != owner => return Err(ApiError::Forbidden),
        Some(_) => {}
    }

    // Register first; replay second.
    let listener = state.broadcaster.subscribe(task_id);
    let guard = ListenerGuard {
        broadcaster: state.broadcaster.clone(),
        task_id,
        listener_id: listener.id,
    };

    let mut replay = Vec::new();
    if let Some(transcript) = state.bus.transcript_buffer(task_id).await? {
        replay.push(encode(&ProgressEvent::transcript_update(transcript))?);
    }
    if let Some(summary) = state.bus.summary_buffer(task_id).await? {
        replay.push(encode(&ProgressEvent::summary_chunk(summary))?);
    }

    let live = ReceiverStream::new(listener.receiver);
    let stream = futures::stream::iter(replay).chain(live).map(move |payload| {
        // The guard rides inside the stream; dropping the stream
        // unsubscribes the listener.
        let _keep_alive = &guard;
        Ok::<_, Infallible>(Event::default().data(payload))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
