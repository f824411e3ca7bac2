//! # Task Publisher
//!
//! The single queue-publish handle of a process. The underlying AMQP channel
//! is not safe for interleaved publishes, so every use goes through one
//! `tokio::sync::Mutex`. The worker engine swaps in a fresh channel via
//! [`TaskPublisher::replace`] on every reconnect; the stale channel is
//! dropped. Publishes are persistent and awaited through publisher confirms
//! so a `sent` outbox row really means the broker accepted the message.

use std::sync::Arc;

use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};
use tokio::sync::Mutex;

use crate::errors::{ScribeError, ScribeResult};
use crate::messaging::TaskMessage;

/// Declare the durable work queue. Idempotent; called on every (re)connect.
pub async fn declare_task_queue(channel: &Channel, queue: &str) -> ScribeResult<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Mutex-guarded publish handle shared between the relay and the engine.
#[derive(Debug, Clone)]
pub struct TaskPublisher {
    queue: String,
    channel: Arc<Mutex<Option<Channel>>>,
}

impl TaskPublisher {
    /// Create a publisher with no live channel yet. Publishes fail until
    /// [`replace`](Self::replace) installs one.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            channel: Arc::new(Mutex::new(None)),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Install a fresh channel after a (re)connect, enabling publisher
    /// confirms and declaring the queue. The previous channel is discarded.
    pub async fn replace(&self, channel: Channel) -> ScribeResult<()> {
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        declare_task_queue(&channel, &self.queue).await?;

        let mut guard = self.channel.lock().await;
        *guard = Some(channel);
        Ok(())
    }

    /// Publish a persistent task message and wait for the broker confirm.
    pub async fn publish(&self, message: &TaskMessage) -> ScribeResult<()> {
        let payload = serde_json::to_vec(message)?;

        let guard = self.channel.lock().await;
        let channel = guard
            .as_ref()
            .ok_or_else(|| ScribeError::Messaging("queue publisher not connected".to_string()))?;

        let confirm = channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await?
            .await?;

        if let Confirmation::Nack(_) = confirm {
            return Err(ScribeError::Messaging(format!(
                "broker nacked publish to '{}'",
                self.queue
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::TaskOptions;
    use uuid::Uuid;

    #[tokio::test]
    async fn publish_without_channel_fails_cleanly() {
        let publisher = TaskPublisher::new("tasks");
        let message =
            TaskMessage::stt(Uuid::now_v7(), "user", "/tmp/a.wav", TaskOptions::default());

        let err = publisher.publish(&message).await.unwrap_err();
        assert!(matches!(err, ScribeError::Messaging(_)));
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn queue_name_is_exposed() {
        let publisher = TaskPublisher::new("tasks");
        assert_eq!(publisher.queue(), "tasks");
    }
}
