//! # Error Types
//!
//! `ScribeError` is the umbrella error for the pipeline. The variants map
//! onto the failure dispositions the worker cares about: `StateConflict` is
//! the "another actor won" signal from conditional updates and is handled by
//! silently abandoning the work item, while everything else surfaces as a
//! terminal `failed` state or a retryable infrastructure error.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::models::TaskState;

/// Result alias used across the workspace.
pub type ScribeResult<T> = Result<T, ScribeError>;

#[derive(Debug, Error)]
pub enum ScribeError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A conditional state transition matched zero rows. Another actor
    /// already moved the task; the caller must abandon the action.
    #[error("state conflict for task {task_id}: no row in state {expected} to move to {requested}")]
    StateConflict {
        task_id: Uuid,
        expected: TaskState,
        requested: TaskState,
    },

    #[error("task {task_id} has no stored transcript")]
    MissingTranscript { task_id: Uuid },

    #[error("messaging error: {0}")]
    Messaging(String),

    #[error("event bus error: {0}")]
    Bus(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audio chunking failed: {0}")]
    Chunking(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScribeError {
    /// True when the error is a refused conditional update rather than a
    /// real failure.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, Self::StateConflict { .. })
    }
}

impl From<lapin::Error> for ScribeError {
    fn from(error: lapin::Error) -> Self {
        Self::Messaging(error.to_string())
    }
}

impl From<config::ConfigError> for ScribeError {
    fn from(error: config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

/// Failures from the external STT and LLM providers.
///
/// Both classes currently end the task as `failed`; the split is kept so the
/// message recorded on the task distinguishes "try again later" from "your
/// input was rejected".
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("provider rejected the request: {0}")]
    Permanent(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_conflict_is_detectable() {
        let err = ScribeError::StateConflict {
            task_id: Uuid::nil(),
            expected: TaskState::Pending,
            requested: TaskState::Processing,
        };
        assert!(err.is_state_conflict());
        assert!(!ScribeError::Messaging("boom".into()).is_state_conflict());
    }

    #[test]
    fn provider_errors_render_their_class() {
        let transient = ProviderError::Transient("503".into());
        assert!(transient.to_string().contains("transient"));

        let timeout = ProviderError::Timeout(Duration::from_secs(300));
        assert!(timeout.to_string().contains("timed out"));
    }
}
