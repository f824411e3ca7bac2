//! # Stale Task Reaper
//!
//! Periodic sweep recovering orphaned work: tasks stuck in `processing`
//! past the liveness timeout (worker crash mid-task, lost redelivery) are
//! failed in bulk, and a best-effort `failed` event is published for each so
//! connected streams learn about it.

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scribe_shared::bus::EventBus;
use scribe_shared::config::ReaperConfig;
use scribe_shared::events::ProgressEvent;
use scribe_shared::store::TaskStore;

pub struct Reaper {
    store: TaskStore,
    bus: EventBus,
    config: ReaperConfig,
    shutdown: CancellationToken,
}

impl Reaper {
    pub fn new(
        store: TaskStore,
        bus: EventBus,
        config: ReaperConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            bus,
            config,
            shutdown,
        }
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            match self.store.reap_stale_processing(self.config.timeout()).await {
                Ok(reaped) if reaped.is_empty() => {}
                Ok(reaped) => {
                    info!(count = reaped.len(), "reaped stale processing tasks");
                    for task_id in reaped {
                        let event = ProgressEvent::failed("processing timed out");
                        if let Err(error) = self.bus.publish_progress(task_id, &event).await {
                            warn!(task_id = %task_id, error = %error, "reaper event publish failed");
                        }
                    }
                }
                Err(error) => {
                    warn!(error = %error, "reaper sweep failed");
                }
            }
        }
    }
}
