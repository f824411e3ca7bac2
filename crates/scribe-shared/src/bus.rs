//! # Event Bus
//!
//! Redis-backed pub/sub for progress fan-out plus the small ephemeral
//! keyspace (replay buffers, ownership records). Publishing is
//! fire-and-forget: delivery is at-most-once and lost events are tolerated —
//! terminal state lives in the database and the replay buffers recover lost
//! partials for reconnecting clients.
//!
//! Commands go through a shared [`ConnectionManager`]; each subscription
//! gets its own dedicated pub/sub connection so one process holds O(1) bus
//! connections regardless of client load (the broadcaster multiplexes).

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::errors::ScribeResult;
use crate::events::{
    owner_key, progress_channel, summary_buffer_key, transcript_buffer_key, CancelSignal,
    ProgressEvent, CANCEL_CHANNEL,
};

/// Handle to the Redis event bus and ephemeral keyspace.
#[derive(Clone)]
pub struct EventBus {
    client: redis::Client,
    conn: ConnectionManager,
    replay_ttl: Duration,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("replay_ttl", &self.replay_ttl)
            .finish()
    }
}

impl EventBus {
    /// Connect to Redis and establish the shared command connection.
    pub async fn connect(config: &RedisConfig, replay_ttl: Duration) -> ScribeResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client.clone()).await?;

        Ok(Self {
            client,
            conn,
            replay_ttl,
        })
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Fire-and-forget publish of a raw payload.
    pub async fn publish(&self, channel: &str, payload: &str) -> ScribeResult<()> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    /// Publish a progress event on the task's channel.
    pub async fn publish_progress(&self, task_id: Uuid, event: &ProgressEvent) -> ScribeResult<()> {
        let payload = serde_json::to_string(event)?;
        self.publish(&progress_channel(task_id), &payload).await
    }

    /// Publish a cancellation signal on the global channel.
    pub async fn publish_cancel(&self, task_id: Uuid) -> ScribeResult<()> {
        let payload = serde_json::to_string(&CancelSignal { task_id })?;
        self.publish(CANCEL_CHANNEL, &payload).await
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to a single channel. Returns a stream of
    /// `(channel, payload)` pairs on a dedicated connection; the stream ends
    /// when the connection drops, and the caller resubscribes with backoff.
    pub async fn subscribe(&self, channel: &str) -> ScribeResult<BoxStream<'static, (String, String)>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(Self::message_stream(pubsub))
    }

    /// Glob-pattern subscription, e.g. `progress:*`.
    pub async fn pattern_subscribe(
        &self,
        pattern: &str,
    ) -> ScribeResult<BoxStream<'static, (String, String)>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;
        Ok(Self::message_stream(pubsub))
    }

    fn message_stream(pubsub: redis::aio::PubSub) -> BoxStream<'static, (String, String)> {
        pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                let channel = msg.get_channel_name().to_string();
                match msg.get_payload::<String>() {
                    Ok(payload) => Some((channel, payload)),
                    Err(error) => {
                        warn!(channel = %channel, error = %error, "dropping undecodable bus payload");
                        None
                    }
                }
            })
            .boxed()
    }

    // =========================================================================
    // Replay buffers
    // =========================================================================

    /// Store the cumulative transcript for reconnect replay.
    pub async fn store_transcript_buffer(&self, task_id: Uuid, text: &str) -> ScribeResult<()> {
        let mut conn = self.conn.clone();
        let () = conn
            .set_ex(transcript_buffer_key(task_id), text, self.replay_ttl.as_secs())
            .await?;
        Ok(())
    }

    /// Store the accumulated summary for reconnect replay.
    pub async fn store_summary_buffer(&self, task_id: Uuid, text: &str) -> ScribeResult<()> {
        let mut conn = self.conn.clone();
        let () = conn
            .set_ex(summary_buffer_key(task_id), text, self.replay_ttl.as_secs())
            .await?;
        Ok(())
    }

    pub async fn transcript_buffer(&self, task_id: Uuid) -> ScribeResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(transcript_buffer_key(task_id)).await?)
    }

    pub async fn summary_buffer(&self, task_id: Uuid) -> ScribeResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(summary_buffer_key(task_id)).await?)
    }

    // =========================================================================
    // Ownership records
    // =========================================================================

    /// Record the task owner at creation time; consulted by the stream
    /// endpoint for authorization.
    pub async fn record_owner(&self, task_id: Uuid, owner: &str) -> ScribeResult<()> {
        let mut conn = self.conn.clone();
        let () = conn.set(owner_key(task_id), owner).await?;
        Ok(())
    }

    pub async fn owner_of(&self, task_id: Uuid) -> ScribeResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(owner_key(task_id)).await?)
    }

    /// Remove every ephemeral key belonging to a deleted task.
    pub async fn clear_task_keys(&self, task_id: Uuid) -> ScribeResult<()> {
        let mut conn = self.conn.clone();
        let _removed: i64 = conn
            .del(vec![
                owner_key(task_id),
                transcript_buffer_key(task_id),
                summary_buffer_key(task_id),
            ])
            .await?;
        Ok(())
    }

    /// Liveness probe for health reporting.
    pub async fn ping(&self) -> ScribeResult<()> {
        let mut conn = self.conn.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(all(test, feature = "test-services"))]
mod tests {
    use super::*;
    use crate::config::RedisConfig;

    async fn test_bus() -> EventBus {
        let config = RedisConfig {
            url: std::env::var("SCRIBE_TEST_REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379/1".to_string()),
        };
        EventBus::connect(&config, Duration::from_secs(60))
            .await
            .expect("redis available for test-services")
    }

    #[tokio::test]
    async fn replay_buffer_round_trip() {
        let bus = test_bus().await;
        let task_id = Uuid::now_v7();

        assert_eq!(bus.transcript_buffer(task_id).await.unwrap(), None);

        bus.store_transcript_buffer(task_id, "hello world")
            .await
            .unwrap();
        assert_eq!(
            bus.transcript_buffer(task_id).await.unwrap().as_deref(),
            Some("hello world")
        );

        bus.clear_task_keys(task_id).await.unwrap();
        assert_eq!(bus.transcript_buffer(task_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn owner_record_round_trip() {
        let bus = test_bus().await;
        let task_id = Uuid::now_v7();

        bus.record_owner(task_id, "user-9").await.unwrap();
        assert_eq!(
            bus.owner_of(task_id).await.unwrap().as_deref(),
            Some("user-9")
        );

        bus.clear_task_keys(task_id).await.unwrap();
        assert_eq!(bus.owner_of(task_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn pattern_subscribe_receives_progress_events() {
        let bus = test_bus().await;
        let task_id = Uuid::now_v7();

        let mut stream = bus.pattern_subscribe("progress:*").await.unwrap();

        // Give the subscription a beat to register before publishing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.publish_progress(task_id, &ProgressEvent::processing(10, "processing audio"))
            .await
            .unwrap();

        let (channel, payload) =
            tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .expect("event within timeout")
                .expect("stream open");
        assert_eq!(channel, progress_channel(task_id));
        assert!(payload.contains(r#""type":"progress""#));
    }
}
