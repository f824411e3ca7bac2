//! # Task and TaskResult Rows
//!
//! The `tasks` row is the source of truth for a job's lifecycle. Every state
//! advance goes through a conditional update guarded by the expected source
//! state, so concurrent actors (control API, worker, reaper) serialize
//! through the database rather than through in-process locks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a task.
///
/// Allowed transitions:
/// `pending→processing`, `pending→cancelled`, `processing→completed`,
/// `processing→failed`, `processing→cancelled`, and the re-summarize path
/// `completed→processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states admit no further transitions except
    /// `completed→processing` (re-summarize).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transcription task.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    pub user_id: String,
    pub status: TaskState,
    pub file_path: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transcript and summary produced for a task.
///
/// Upserted; an empty incoming column preserves the stored value so the STT
/// and SUMMARY stages can write independently.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub transcript: String,
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Processing.is_terminal());
    }

    #[test]
    fn serde_uses_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskState::Processing).unwrap(),
            r#""processing""#
        );
        let state: TaskState = serde_json::from_str(r#""cancelled""#).unwrap();
        assert_eq!(state, TaskState::Cancelled);
    }

    #[test]
    fn display_matches_column_values() {
        assert_eq!(TaskState::Pending.to_string(), "pending");
        assert_eq!(TaskState::Completed.to_string(), "completed");
    }
}
