//! # Queue Messaging
//!
//! Wire types for the durable `tasks` queue plus the publish side of the
//! connection. Messages are advisory work triggers; the database remains the
//! source of truth, and redeliveries are made harmless by the conditional
//! state transitions in the store.

pub mod message;
pub mod publisher;

pub use message::{TaskKind, TaskMessage, TaskOptions};
pub use publisher::{declare_task_queue, TaskPublisher};
