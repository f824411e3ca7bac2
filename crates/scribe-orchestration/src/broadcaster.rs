//! # Event Broadcaster
//!
//! One pattern subscription to `progress:*` per process, fanned out
//! in-process to the listener channels of connected streams. Without this
//! multiplexer every client stream would hold its own bus subscription and
//! the connection count would scale with user load instead of process count.
//!
//! Delivery into listener buffers is strictly non-blocking: a full buffer
//! drops the event for that listener only, so one laggy client can never
//! stall the fan-out or any sibling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use scribe_shared::events::task_id_from_channel;
use tracing::{debug, info, warn};

/// Buffered events per listener before drops kick in.
const LISTENER_BUFFER: usize = 16;

#[derive(Debug)]
struct ListenerSlot {
    id: u64,
    sender: mpsc::Sender<String>,
}

/// A registered listener; receives raw event JSON payloads.
#[derive(Debug)]
pub struct BroadcastListener {
    pub id: u64,
    pub receiver: mpsc::Receiver<String>,
}

#[derive(Debug, Default)]
pub struct Broadcaster {
    next_listener_id: AtomicU64,
    registry: RwLock<HashMap<Uuid, Vec<ListenerSlot>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for a task's events.
    pub fn subscribe(&self, task_id: Uuid) -> BroadcastListener {
        let (sender, receiver) = mpsc::channel(LISTENER_BUFFER);
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);

        let mut registry = self.registry.write().unwrap_or_else(|p| p.into_inner());
        registry
            .entry(task_id)
            .or_default()
            .push(ListenerSlot { id, sender });

        BroadcastListener { id, receiver }
    }

    /// Remove a listener; empty task entries are deleted so the registry
    /// stays bounded by the number of connected streams.
    pub fn unsubscribe(&self, task_id: Uuid, listener_id: u64) {
        let mut registry = self.registry.write().unwrap_or_else(|p| p.into_inner());
        if let Some(slots) = registry.get_mut(&task_id) {
            slots.retain(|slot| slot.id != listener_id);
            if slots.is_empty() {
                registry.remove(&task_id);
            }
        }
    }

    /// Listeners currently registered for a task.
    pub fn listener_count(&self, task_id: Uuid) -> usize {
        let registry = self.registry.read().unwrap_or_else(|p| p.into_inner());
        registry.get(&task_id).map_or(0, Vec::len)
    }

    /// Non-blocking fan-out of one event to every listener of the task.
    pub fn dispatch(&self, task_id: Uuid, payload: &str) {
        let mut stale = Vec::new();

        {
            let registry = self.registry.read().unwrap_or_else(|p| p.into_inner());
            let Some(slots) = registry.get(&task_id) else {
                return;
            };

            for slot in slots {
                match slot.sender.try_send(payload.to_string()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Slow consumer: drop for this listener only.
                        debug!(task_id = %task_id, listener_id = slot.id, "listener buffer full; event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        stale.push(slot.id);
                    }
                }
            }
        }

        // Lazily prune listeners whose receiving side went away without an
        // explicit unsubscribe.
        if !stale.is_empty() {
            let mut registry = self.registry.write().unwrap_or_else(|p| p.into_inner());
            if let Some(slots) = registry.get_mut(&task_id) {
                slots.retain(|slot| !stale.contains(&slot.id));
                if slots.is_empty() {
                    registry.remove(&task_id);
                }
            }
        }
    }

    /// Drain a `(channel, payload)` event stream into the registry until the
    /// stream ends or shutdown is requested. The caller owns resubscription.
    pub async fn run<S>(&self, mut events: S, shutdown: CancellationToken)
    where
        S: Stream<Item = (String, String)> + Unpin,
    {
        info!("broadcaster consuming progress subscription");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                item = events.next() => match item {
                    Some((channel, payload)) => match task_id_from_channel(&channel) {
                        Some(task_id) => self.dispatch(task_id, &payload),
                        None => {
                            warn!(channel = %channel, "event on unrecognized progress channel");
                        }
                    },
                    None => {
                        warn!("progress subscription ended");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_shared::events::progress_channel;

    #[tokio::test]
    async fn fan_out_reaches_every_listener() {
        let broadcaster = Broadcaster::new();
        let task_id = Uuid::now_v7();

        let mut first = broadcaster.subscribe(task_id);
        let mut second = broadcaster.subscribe(task_id);
        assert_eq!(broadcaster.listener_count(task_id), 2);

        broadcaster.dispatch(task_id, r#"{"type":"completed"}"#);

        assert_eq!(first.receiver.recv().await.unwrap(), r#"{"type":"completed"}"#);
        assert_eq!(second.receiver.recv().await.unwrap(), r#"{"type":"completed"}"#);
    }

    #[tokio::test]
    async fn events_are_scoped_to_their_task() {
        let broadcaster = Broadcaster::new();
        let watched = Uuid::now_v7();
        let other = Uuid::now_v7();

        let mut listener = broadcaster.subscribe(watched);
        broadcaster.dispatch(other, "noise");
        broadcaster.dispatch(watched, "signal");

        assert_eq!(listener.receiver.recv().await.unwrap(), "signal");
    }

    #[tokio::test]
    async fn slow_listener_does_not_stall_siblings() {
        let broadcaster = Broadcaster::new();
        let task_id = Uuid::now_v7();

        // The slow listener never drains; its buffer fills and overflows.
        let _slow = broadcaster.subscribe(task_id);
        let mut healthy = broadcaster.subscribe(task_id);

        let total = LISTENER_BUFFER + 8;
        for n in 0..total {
            broadcaster.dispatch(task_id, &format!("event-{n}"));
        }

        // The healthy listener drains as it goes and observes everything it
        // has buffer room for; dispatch never blocked on the slow one.
        for n in 0..LISTENER_BUFFER {
            assert_eq!(healthy.receiver.recv().await.unwrap(), format!("event-{n}"));
        }
    }

    #[tokio::test]
    async fn unsubscribe_closes_channel_and_clears_entry() {
        let broadcaster = Broadcaster::new();
        let task_id = Uuid::now_v7();

        let mut listener = broadcaster.subscribe(task_id);
        broadcaster.unsubscribe(task_id, listener.id);

        assert_eq!(broadcaster.listener_count(task_id), 0);
        // Sender side dropped: the channel reads closed.
        assert!(listener.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_lazily() {
        let broadcaster = Broadcaster::new();
        let task_id = Uuid::now_v7();

        let listener = broadcaster.subscribe(task_id);
        drop(listener);
        assert_eq!(broadcaster.listener_count(task_id), 1);

        broadcaster.dispatch(task_id, "anything");
        assert_eq!(broadcaster.listener_count(task_id), 0);
    }

    #[tokio::test]
    async fn run_routes_channel_names_to_tasks() {
        let broadcaster = Broadcaster::new();
        let task_id = Uuid::now_v7();
        let mut listener = broadcaster.subscribe(task_id);

        let events = futures::stream::iter(vec![
            ("bogus-channel".to_string(), "ignored".to_string()),
            (progress_channel(task_id), "delivered".to_string()),
        ]);

        broadcaster.run(events, CancellationToken::new()).await;

        assert_eq!(listener.receiver.recv().await.unwrap(), "delivered");
    }
}
