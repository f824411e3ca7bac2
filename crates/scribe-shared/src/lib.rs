//! # Scribe Shared Components
//!
//! Common foundation for the scribe transcription pipeline: durable task
//! state (PostgreSQL), the work queue wire types and publisher (RabbitMQ),
//! the progress event bus and replay buffers (Redis), configuration,
//! logging, and error types shared by the orchestration and worker crates.

pub mod bus;
pub mod config;
pub mod errors;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod resilience;
pub mod shutdown;
pub mod store;

pub use errors::{ProviderError, ScribeError, ScribeResult};
