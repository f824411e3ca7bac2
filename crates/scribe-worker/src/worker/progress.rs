//! Progress publication helper.
//!
//! Bus publishes are best-effort: a failed publish is logged and swallowed,
//! because the terminal disposition always lands in the database and replay
//! buffers cover reconnecting clients.

use tracing::warn;
use uuid::Uuid;

use scribe_shared::bus::EventBus;
use scribe_shared::events::ProgressEvent;

#[derive(Debug, Clone)]
pub struct ProgressNotifier {
    bus: EventBus,
    task_id: Uuid,
}

impl ProgressNotifier {
    pub fn new(bus: EventBus, task_id: Uuid) -> Self {
        Self { bus, task_id }
    }

    async fn publish(&self, event: ProgressEvent) {
        if let Err(error) = self.bus.publish_progress(self.task_id, &event).await {
            warn!(task_id = %self.task_id, error = %error, "progress publish failed");
        }
    }

    pub async fn processing(&self, progress: u8, message: &str) {
        self.publish(ProgressEvent::processing(progress, message)).await;
    }

    /// Emit the full cumulative transcript and refresh its replay buffer.
    pub async fn transcript_update(&self, cumulative: &str) {
        if let Err(error) = self
            .bus
            .store_transcript_buffer(self.task_id, cumulative)
            .await
        {
            warn!(task_id = %self.task_id, error = %error, "transcript buffer write failed");
        }
        self.publish(ProgressEvent::transcript_update(cumulative)).await;
    }

    /// Emit a summary delta and refresh the accumulated replay buffer.
    pub async fn summary_chunk(&self, delta: &str, accumulated: &str) {
        if let Err(error) = self.bus.store_summary_buffer(self.task_id, accumulated).await {
            warn!(task_id = %self.task_id, error = %error, "summary buffer write failed");
        }
        self.publish(ProgressEvent::summary_chunk(delta)).await;
    }

    pub async fn completed(&self) {
        self.publish(ProgressEvent::completed()).await;
    }

    pub async fn failed(&self, message: &str) {
        self.publish(ProgressEvent::failed(message)).await;
    }

    pub async fn cancelled(&self) {
        self.publish(ProgressEvent::cancelled()).await;
    }
}
