//! # Cancellation Listener
//!
//! Long-lived subscriber to the global cancellation channel. Each payload
//! names a task id; if that task is in flight here, its context token is
//! triggered. The subscription self-heals: on loss it waits a few seconds
//! and resubscribes, until the worker itself shuts down.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scribe_shared::events::{CancelSignal, CANCEL_CHANNEL};

use super::WorkerContext;

pub struct CancellationListener {
    context: Arc<WorkerContext>,
    shutdown: CancellationToken,
}

impl CancellationListener {
    pub fn new(context: Arc<WorkerContext>, shutdown: CancellationToken) -> Self {
        Self { context, shutdown }
    }

    pub async fn run(&self) {
        let retry_delay = self.context.config.worker.cancel_resubscribe_delay();

        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            match self.context.bus.subscribe(CANCEL_CHANNEL).await {
                Ok(mut stream) => {
                    info!(channel = CANCEL_CHANNEL, "cancellation listener subscribed");
                    loop {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => return,
                            item = stream.next() => match item {
                                Some((_channel, payload)) => self.handle_payload(&payload),
                                None => {
                                    warn!("cancellation subscription lost");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(error = %error, "cancellation subscribe failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(retry_delay) => {}
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    fn handle_payload(&self, payload: &str) {
        let signal: CancelSignal = match serde_json::from_str(payload) {
            Ok(signal) => signal,
            Err(error) => {
                warn!(error = %error, "ignoring malformed cancel signal");
                return;
            }
        };

        match self.context.active.get(&signal.task_id) {
            Some(entry) => {
                info!(task_id = %signal.task_id, "cancelling in-flight task");
                entry.cancel();
            }
            None => {
                // Normal when another worker owns the task or it finished.
                debug!(task_id = %signal.task_id, "cancel signal for task not active here");
            }
        }
    }
}
