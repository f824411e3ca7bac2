//! # Outbox Relay
//!
//! Periodically claims pending outbox rows and publishes the task messages
//! they carry through the engine's publish handle. A row is marked `sent`
//! inside the claiming transaction only when the broker confirmed the
//! publish; failed rows stay pending and are retried on a later pass, which
//! is where the at-least-once queue semantics come from.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scribe_shared::errors::ScribeResult;
use scribe_shared::messaging::TaskMessage;
use scribe_shared::store::OutboxBatchStats;

use crate::worker::WorkerContext;

pub struct OutboxRelay {
    context: Arc<WorkerContext>,
    shutdown: CancellationToken,
}

impl OutboxRelay {
    pub fn new(context: Arc<WorkerContext>, shutdown: CancellationToken) -> Self {
        Self { context, shutdown }
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.context.config.outbox.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            match self.drain_once().await {
                Ok(stats) if stats.claimed > 0 => {
                    debug!(
                        claimed = stats.claimed,
                        sent = stats.sent,
                        failed = stats.failed,
                        "outbox pass finished"
                    );
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(error = %error, "outbox pass failed");
                }
            }
        }
    }

    /// One claim-and-publish pass.
    pub async fn drain_once(&self) -> ScribeResult<OutboxBatchStats> {
        let publisher = self.context.publisher.clone();
        let batch_size = self.context.config.outbox.batch_size;

        self.context
            .store
            .claim_outbox_batch(batch_size, move |event| {
                let publisher = publisher.clone();
                async move {
                    let message: TaskMessage = serde_json::from_value(event.payload)?;
                    publisher.publish(&message).await
                }
            })
            .await
    }
}
