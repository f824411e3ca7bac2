//! Worker process wiring: build the shared context, then start the engine,
//! the outbox relay, and the cancellation listener.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use scribe_shared::bus::EventBus;
use scribe_shared::config::ScribeConfig;
use scribe_shared::errors::ScribeResult;
use scribe_shared::messaging::TaskPublisher;
use scribe_shared::store::{connect_pool, TaskStore};

use crate::providers::{LlmProvider, SttProvider};
use crate::relay::OutboxRelay;
use crate::worker::cancel::CancellationListener;
use crate::worker::{WorkerContext, WorkerEngine};

/// Running worker process; `stop()` tears the background tasks down.
pub struct WorkerHandle {
    pub context: Arc<WorkerContext>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Cancel all background tasks and wait for them to finish. In-flight
    /// deliveries are left unacked so the broker redelivers them.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

pub async fn bootstrap(config: ScribeConfig) -> ScribeResult<WorkerHandle> {
    let pool = connect_pool(&config.database).await?;
    let store = TaskStore::new(pool);
    let bus = EventBus::connect(&config.redis, config.stream.replay_ttl()).await?;

    let stt = SttProvider::from_config(&config.stt)?;
    let llm = LlmProvider::from_config(&config.llm)?;
    info!(
        stt_provider = stt.provider_name(),
        llm_provider = llm.provider_name(),
        "providers selected"
    );

    let publisher = TaskPublisher::new(&config.queue.name);

    let context = Arc::new(WorkerContext {
        config,
        store,
        bus,
        stt,
        llm,
        publisher,
        active: DashMap::new(),
    });

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    let listener = CancellationListener::new(context.clone(), shutdown.clone());
    tasks.push(tokio::spawn(async move { listener.run().await }));

    let relay = OutboxRelay::new(context.clone(), shutdown.clone());
    tasks.push(tokio::spawn(async move { relay.run().await }));

    let engine = WorkerEngine::new(context.clone(), shutdown.clone());
    tasks.push(tokio::spawn(async move {
        if let Err(err) = engine.run().await {
            error!(error = %err, "worker engine exited with error");
        }
    }));

    Ok(WorkerHandle {
        context,
        shutdown,
        tasks,
    })
}
