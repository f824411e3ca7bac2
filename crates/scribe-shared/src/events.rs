//! # Progress Events and Channel Conventions
//!
//! Wire types carried over the Redis event bus and delivered to browsers as
//! SSE frames. Per-task events travel on `progress:{taskId}`; cancellation
//! signals travel on the global `cancel_channel`. The bus is best-effort:
//! lost events are tolerated because terminal state lives in the database
//! and partials are recoverable from the replay buffers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Global channel carrying [`CancelSignal`] payloads.
pub const CANCEL_CHANNEL: &str = "cancel_channel";

/// Prefix of per-task progress channels.
pub const PROGRESS_PREFIX: &str = "progress:";

/// Pattern matching every per-task progress channel.
pub const PROGRESS_PATTERN: &str = "progress:*";

/// Per-task progress channel name.
pub fn progress_channel(task_id: Uuid) -> String {
    format!("{PROGRESS_PREFIX}{task_id}")
}

/// Extract the task id from a progress channel name.
pub fn task_id_from_channel(channel: &str) -> Option<Uuid> {
    channel
        .strip_prefix(PROGRESS_PREFIX)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

/// Replay buffer key holding the cumulative transcript.
pub fn transcript_buffer_key(task_id: Uuid) -> String {
    format!("transcript:buffer:{task_id}")
}

/// Replay buffer key holding the accumulated summary.
pub fn summary_buffer_key(task_id: Uuid) -> String {
    format!("summary:buffer:{task_id}")
}

/// Ownership record key consulted by the stream endpoint.
pub fn owner_key(task_id: Uuid) -> String {
    format!("task:owner:{task_id}")
}

/// Payload published on [`CANCEL_CHANNEL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSignal {
    #[serde(rename = "taskId")]
    pub task_id: Uuid,
}

/// Event streamed to clients watching a task.
///
/// `transcript_update` always carries the full cumulative transcript so a
/// client can replace its view idempotently; `summary_chunk` carries only
/// the delta (the replay buffer compensates on reconnect).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        status: String,
        progress: u8,
        message: String,
    },
    TranscriptUpdate {
        content: String,
    },
    SummaryChunk {
        content: String,
    },
    Completed,
    Failed {
        status: String,
        message: String,
    },
    Cancelled {
        status: String,
        message: String,
    },
}

impl ProgressEvent {
    /// A processing progress checkpoint (0-100).
    pub fn processing(progress: u8, message: impl Into<String>) -> Self {
        Self::Progress {
            status: "processing".to_string(),
            progress: progress.min(100),
            message: message.into(),
        }
    }

    pub fn transcript_update(content: impl Into<String>) -> Self {
        Self::TranscriptUpdate {
            content: content.into(),
        }
    }

    pub fn summary_chunk(content: impl Into<String>) -> Self {
        Self::SummaryChunk {
            content: content.into(),
        }
    }

    pub fn completed() -> Self {
        Self::Completed
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            status: "failed".to_string(),
            message: message.into(),
        }
    }

    /// Cancellation carries no user-visible error text beyond "cancelled".
    pub fn cancelled() -> Self {
        Self::Cancelled {
            status: "cancelled".to_string(),
            message: "cancelled".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_wire_format() {
        let event = ProgressEvent::processing(30, "transcribing 3 chunks");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"progress","status":"processing","progress":30,"message":"transcribing 3 chunks"}"#
        );
    }

    #[test]
    fn transcript_update_wire_format() {
        let event = ProgressEvent::transcript_update("hello world");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"transcript_update","content":"hello world"}"#);
    }

    #[test]
    fn summary_chunk_wire_format() {
        let event = ProgressEvent::summary_chunk("Sum");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"summary_chunk","content":"Sum"}"#);
    }

    #[test]
    fn completed_wire_format() {
        let json = serde_json::to_string(&ProgressEvent::completed()).unwrap();
        assert_eq!(json, r#"{"type":"completed"}"#);
    }

    #[test]
    fn failed_and_cancelled_carry_status_and_message() {
        let failed: ProgressEvent =
            serde_json::from_str(r#"{"type":"failed","status":"failed","message":"boom"}"#)
                .unwrap();
        assert_eq!(failed, ProgressEvent::failed("boom"));

        let cancelled = serde_json::to_string(&ProgressEvent::cancelled()).unwrap();
        assert_eq!(
            cancelled,
            r#"{"type":"cancelled","status":"cancelled","message":"cancelled"}"#
        );
    }

    #[test]
    fn progress_percent_is_clamped() {
        let event = ProgressEvent::processing(150, "over");
        assert!(matches!(event, ProgressEvent::Progress { progress: 100, .. }));
    }

    #[test]
    fn channel_round_trip() {
        let task_id = Uuid::now_v7();
        let channel = progress_channel(task_id);
        assert_eq!(task_id_from_channel(&channel), Some(task_id));
        assert_eq!(task_id_from_channel("cancel_channel"), None);
        assert_eq!(task_id_from_channel("progress:not-a-uuid"), None);
    }

    #[test]
    fn cancel_signal_uses_camel_case_task_id() {
        let task_id = Uuid::now_v7();
        let json = serde_json::to_string(&CancelSignal { task_id }).unwrap();
        assert_eq!(json, format!(r#"{{"taskId":"{task_id}"}}"#));
    }

    #[test]
    fn replay_keys_match_layout() {
        let id = Uuid::nil();
        assert_eq!(
            transcript_buffer_key(id),
            format!("transcript:buffer:{id}")
        );
        assert_eq!(summary_buffer_key(id), format!("summary:buffer:{id}"));
        assert_eq!(owner_key(id), format!("task:owner:{id}"));
    }
}
