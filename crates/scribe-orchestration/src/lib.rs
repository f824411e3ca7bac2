//! # Scribe Orchestration
//!
//! The client-facing half of the pipeline: the task control API (create,
//! cancel, re-summarize), the SSE stream endpoint with reconnect-safe
//! replay, the broadcaster that fans one bus subscription out to every
//! connected stream, and the reaper that recovers orphaned tasks.

pub mod api;
pub mod bootstrap;
pub mod broadcaster;
pub mod reaper;
