//! Persisted row types and their state enums.

pub mod outbox;
pub mod task;

pub use outbox::{OutboxEvent, OutboxStatus};
pub use task::{Task, TaskResult, TaskState};
