//! # Outbox Rows
//!
//! An outbox row is the enqueued side effect of a database transaction: the
//! control API and the STT handler insert one in the same transaction as the
//! state change it represents, and the relay later claims pending rows under
//! `FOR UPDATE SKIP LOCKED`, publishes them to the queue, and marks them
//! `sent` within the claiming transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messaging::TaskKind;

/// Dispatch status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outbox_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

/// A pending queue dispatch recorded alongside a task state change.
///
/// `payload` is the serialized [`TaskMessage`](crate::messaging::TaskMessage)
/// the relay will publish.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: TaskKind,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&OutboxStatus::Pending).unwrap(),
            r#""pending""#
        );
        assert_eq!(
            serde_json::to_string(&OutboxStatus::Sent).unwrap(),
            r#""sent""#
        );
    }
}
