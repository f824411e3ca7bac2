//! # Scribe Worker
//!
//! Consumes the durable task queue and executes the two pipeline stages:
//! STT (chunk the audio, transcribe chunks concurrently, stream cumulative
//! transcript updates) and SUMMARY (stream the LLM summary). The worker
//! process also hosts the outbox relay, which drains pending outbox rows
//! through the engine's single publish handle, and the cancellation
//! listener, which aborts in-flight tasks on request.

pub mod bootstrap;
pub mod chunker;
pub mod merge;
pub mod providers;
pub mod relay;
pub mod worker;
