//! Queue message wire format.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which pipeline stage a message (or outbox row) triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outbox_event_type")]
pub enum TaskKind {
    #[sqlx(rename = "STT")]
    #[serde(rename = "STT")]
    Stt,
    #[sqlx(rename = "SUMMARY")]
    #[serde(rename = "SUMMARY")]
    Summary,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stt => f.write_str("STT"),
            Self::Summary => f.write_str("SUMMARY"),
        }
    }
}

/// Per-task processing options carried through the whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskOptions {
    pub language: Option<String>,
    pub stt_model: Option<String>,
    pub summary_prompt: Option<String>,
}

/// JSON body of a queue delivery.
///
/// `filePath` is set for STT work, `transcript` for SUMMARY work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub task_id: Uuid,
    pub creator_id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default)]
    pub config: TaskOptions,
}

impl TaskMessage {
    /// Build the STT message for a freshly created task.
    pub fn stt(
        task_id: Uuid,
        creator_id: impl Into<String>,
        file_path: impl Into<String>,
        config: TaskOptions,
    ) -> Self {
        Self {
            task_id,
            creator_id: creator_id.into(),
            kind: TaskKind::Stt,
            file_path: Some(file_path.into()),
            transcript: None,
            config,
        }
    }

    /// Build the SUMMARY follow-on message carrying the full transcript.
    pub fn summary(
        task_id: Uuid,
        creator_id: impl Into<String>,
        transcript: impl Into<String>,
        config: TaskOptions,
    ) -> Self {
        Self {
            task_id,
            creator_id: creator_id.into(),
            kind: TaskKind::Summary,
            file_path: None,
            transcript: Some(transcript.into()),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stt_message_wire_fields() {
        let task_id = Uuid::now_v7();
        let message = TaskMessage::stt(
            task_id,
            "user-1",
            "/uploads/a.ogg",
            TaskOptions {
                language: Some("en".into()),
                stt_model: Some("whisper-1".into()),
                summary_prompt: None,
            },
        );

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["taskId"], task_id.to_string());
        assert_eq!(value["creatorId"], "user-1");
        assert_eq!(value["type"], "STT");
        assert_eq!(value["filePath"], "/uploads/a.ogg");
        assert!(value.get("transcript").is_none());
        assert_eq!(value["config"]["language"], "en");
        assert_eq!(value["config"]["sttModel"], "whisper-1");
    }

    #[test]
    fn summary_message_round_trip() {
        let message = TaskMessage::summary(
            Uuid::now_v7(),
            "user-2",
            "the transcript",
            TaskOptions {
                summary_prompt: Some("be brief".into()),
                ..Default::default()
            },
        );

        let json = serde_json::to_string(&message).unwrap();
        let parsed: TaskMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, message);
        assert_eq!(parsed.kind, TaskKind::Summary);
        assert_eq!(parsed.transcript.as_deref(), Some("the transcript"));
    }

    #[test]
    fn missing_optional_fields_deserialize() {
        let task_id = Uuid::now_v7();
        let json = format!(
            r#"{{"taskId":"{task_id}","creatorId":"u","type":"SUMMARY","transcript":"t"}}"#
        );
        let parsed: TaskMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.config, TaskOptions::default());
        assert!(parsed.file_path.is_none());
    }
}
