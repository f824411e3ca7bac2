//! # Worker Engine
//!
//! Consumes the durable task queue and dispatches each delivery to the STT
//! or SUMMARY handler inside its own task execution context. The context's
//! cancellation token is registered in a process-wide map keyed by task id
//! so the cancellation listener can abort in-flight work.
//!
//! The consume loop reconnects with jittered exponential backoff. Every
//! reconnect creates a fresh publish channel and installs it in the shared
//! [`TaskPublisher`]; the outbox relay publishes through that same handle.
//!
//! Acknowledgement discipline: deliveries are acked after the handler
//! returns — the terminal disposition is already recorded in the database by
//! then, and conditional transitions make redelivered messages harmless.
//! Unparseable bodies are rejected without requeue. On shutdown, in-flight
//! deliveries are abandoned un-acked so the broker redelivers them.

pub mod cancel;
pub mod progress;
pub mod stt;
pub mod summary;

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scribe_shared::bus::EventBus;
use scribe_shared::config::ScribeConfig;
use scribe_shared::errors::{ScribeError, ScribeResult};
use scribe_shared::messaging::{declare_task_queue, TaskKind, TaskMessage, TaskPublisher};
use scribe_shared::models::TaskState;
use scribe_shared::resilience::Backoff;
use scribe_shared::store::TaskStore;

use crate::providers::{LlmProvider, SttProvider};
use progress::ProgressNotifier;

/// Shared state of the worker process.
#[derive(Debug)]
pub struct WorkerContext {
    pub config: ScribeConfig,
    pub store: TaskStore,
    pub bus: EventBus,
    pub stt: SttProvider,
    pub llm: LlmProvider,
    /// Single queue-publish handle, refreshed on every reconnect.
    pub publisher: TaskPublisher,
    /// Cancellation handles of in-flight tasks, keyed by task id.
    pub active: DashMap<Uuid, CancellationToken>,
}

pub struct WorkerEngine {
    context: Arc<WorkerContext>,
    shutdown: CancellationToken,
}

impl WorkerEngine {
    pub fn new(context: Arc<WorkerContext>, shutdown: CancellationToken) -> Self {
        Self { context, shutdown }
    }

    /// Consume until shutdown, reconnecting with backoff on broker loss.
    pub async fn run(&self) -> ScribeResult<()> {
        let mut backoff = Backoff::from_config(&self.context.config.backoff);

        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            match self.connect_and_consume(&mut backoff).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    error!(error = %error, "queue consumer lost; reconnecting");
                }
            }

            let delay = backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "waiting before queue reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => return Ok(()),
            }
        }
    }

    async fn connect_and_consume(&self, backoff: &mut Backoff) -> ScribeResult<()> {
        let queue = &self.context.config.queue;

        let connection =
            Connection::connect(&queue.url, ConnectionProperties::default()).await?;

        let channel = connection.create_channel().await?;
        channel
            .basic_qos(queue.prefetch, BasicQosOptions::default())
            .await?;
        declare_task_queue(&channel, &queue.name).await?;

        // Fresh publish handle for this connection; the relay picks it up
        // immediately and the stale one is dropped.
        let publish_channel = connection.create_channel().await?;
        self.context.publisher.replace(publish_channel).await?;

        let mut consumer = channel
            .basic_consume(
                &queue.name,
                "scribe-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        backoff.reset();
        info!(queue = %queue.name, prefetch = queue.prefetch, "consuming task queue");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown: stopping queue consumption");
                    return Ok(());
                }
                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => self.dispatch_delivery(delivery),
                    Some(Err(error)) => return Err(error.into()),
                    None => {
                        return Err(ScribeError::Messaging(
                            "queue consumer stream closed".to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// Spawn the execution context for one delivery.
    fn dispatch_delivery(&self, delivery: Delivery) {
        let context = self.context.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let message: TaskMessage = match serde_json::from_slice(&delivery.data) {
                Ok(message) => message,
                Err(error) => {
                    // Poison message: reject without requeue.
                    warn!(error = %error, "rejecting unparseable task message");
                    if let Err(nack_error) = delivery
                        .nack(BasicNackOptions {
                            requeue: false,
                            ..Default::default()
                        })
                        .await
                    {
                        warn!(error = %nack_error, "failed to reject poison message");
                    }
                    return;
                }
            };

            let task_id = message.task_id;
            let token = CancellationToken::new();
            context.active.insert(task_id, token.clone());

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => None,
                result = handle_message(&context, &message, &token) => Some(result),
            };

            context.active.remove(&task_id);

            match outcome {
                // Shutdown mid-task: leave the delivery unacked so the
                // broker redelivers it after restart.
                None => {
                    info!(task_id = %task_id, "shutdown during task; leaving delivery unacked");
                }
                Some(result) => {
                    if let Err(error) = &result {
                        error!(task_id = %task_id, error = %error, "task handler failed");
                    }
                    if let Err(error) = delivery.ack(BasicAckOptions::default()).await {
                        warn!(task_id = %task_id, error = %error, "failed to ack delivery");
                    }
                }
            }
        });
    }
}

async fn handle_message(
    context: &Arc<WorkerContext>,
    message: &TaskMessage,
    token: &CancellationToken,
) -> ScribeResult<()> {
    debug!(task_id = %message.task_id, kind = %message.kind, "dispatching task message");
    match message.kind {
        TaskKind::Stt => stt::handle(context, message, token).await,
        TaskKind::Summary => summary::handle(context, message, token).await,
    }
}

/// Record a terminal failure and notify listeners. A conflict means another
/// actor already moved the task; no event is emitted then.
pub(crate) async fn fail_task(
    context: &WorkerContext,
    notifier: &ProgressNotifier,
    task_id: Uuid,
    message: &str,
) -> ScribeResult<()> {
    match context
        .store
        .transition_failed(task_id, TaskState::Processing, message)
        .await
    {
        Ok(()) => {
            notifier.failed(message).await;
            Ok(())
        }
        Err(error) if error.is_state_conflict() => {
            debug!(task_id = %task_id, "failure transition refused; another actor won");
            Ok(())
        }
        Err(error) => Err(error),
    }
}

/// Record cancellation and notify listeners. The control API usually moved
/// the row already, so a conflict here is the expected no-op.
pub(crate) async fn mark_cancelled(
    context: &WorkerContext,
    notifier: &ProgressNotifier,
    task_id: Uuid,
) -> ScribeResult<()> {
    match context
        .store
        .transition(task_id, TaskState::Processing, TaskState::Cancelled)
        .await
    {
        Ok(()) | Err(ScribeError::StateConflict { .. }) => {
            notifier.cancelled().await;
            Ok(())
        }
        Err(error) => Err(error),
    }
}
