//! Server process wiring: run migrations, build shared state, start the
//! broadcaster feed, the reaper, and the HTTP listener.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use scribe_shared::bus::EventBus;
use scribe_shared::config::ScribeConfig;
use scribe_shared::errors::ScribeResult;
use scribe_shared::events::PROGRESS_PATTERN;
use scribe_shared::resilience::Backoff;
use scribe_shared::store::{connect_pool, TaskStore, MIGRATOR};

use crate::api::{self, ApiState};
use crate::broadcaster::Broadcaster;
use crate::reaper::Reaper;

/// Running server process; `stop()` tears the background tasks down.
pub struct ServerHandle {
    pub state: Arc<ApiState>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

pub async fn bootstrap(config: ScribeConfig) -> ScribeResult<ServerHandle> {
    let pool = connect_pool(&config.database).await?;
    MIGRATOR.run(&pool).await?;

    let store = TaskStore::new(pool);
    let bus = EventBus::connect(&config.redis, config.stream.replay_ttl()).await?;
    let broadcaster = Arc::new(Broadcaster::new());

    let bind = config.api.bind.clone();
    let backoff_config = config.backoff.clone();
    let reaper_config = config.reaper.clone();

    let state = Arc::new(ApiState {
        config,
        store: store.clone(),
        bus: bus.clone(),
        broadcaster: broadcaster.clone(),
    });

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    // Broadcaster feed: one pattern subscription for the process lifetime,
    // resubscribed with backoff if the connection drops.
    {
        let bus = bus.clone();
        let broadcaster = broadcaster.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let mut backoff = Backoff::from_config(&backoff_config);
            loop {
                if shutdown.is_cancelled() {
                    return;
                }

                match bus.pattern_subscribe(PROGRESS_PATTERN).await {
                    Ok(events) => {
                        backoff.reset();
                        broadcaster.run(events, shutdown.clone()).await;
                        if shutdown.is_cancelled() {
                            return;
                        }
                    }
                    Err(bus_error) => {
                        warn!(error = %bus_error, "progress subscription failed");
                    }
                }

                let delay = backoff.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return,
                }
            }
        }));
    }

    let reaper = Reaper::new(store, bus, reaper_config, shutdown.clone());
    tasks.push(tokio::spawn(async move { reaper.run().await }));

    // HTTP listener with graceful shutdown.
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(bind = %bind, "http listener bound");
    let app = api::router(state.clone());
    {
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(serve_error) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!(error = %serve_error, "http server exited with error");
            }
        }));
    }

    Ok(ServerHandle {
        state,
        shutdown,
        tasks,
    })
}
