use std::sync::Arc;

use tracing::{debug, info, warn};

pub mod api;
pub mod clock;
pub mod config;
pub mod store;

use clock::LamportClock;
use config::Config;
use store::{Checkpointer, StationStore};

pub struct AppState {
    pub store: Arc<StationStore>,
    pub clock: Arc<LamportClock>,
    /// Capacity-1 nudge channel to the durability worker. Accepted upserts
    /// try-send; a full channel means a checkpoint is already pending.
    pub checkpoint_tx: tokio::sync::mpsc::Sender<()>,
    pub config: Config,
}

pub async fn run_server() -> anyhow::Result<()> {
    let config = Config::from_env();
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let clock = Arc::new(LamportClock::new());
    let store = Arc::new(StationStore::new(clock.clone()));
    let checkpointer = Arc::new(Checkpointer::new(config.data_dir.clone()));

    // Recover before accepting any request: a restart resumes from the last
    // committed state, not an empty store.
    match checkpointer.load().await {
        Ok(snapshot) if !snapshot.is_empty() => {
            store.restore(snapshot);
            info!(
                stations = store.len(),
                clock = clock.current(),
                "restored from checkpoint"
            );
        }
        Ok(_) => info!("no checkpoint found, starting empty"),
        Err(e) => warn!("could not read checkpoint, starting empty: {e:#}"),
    }

    let (checkpoint_tx, mut checkpoint_rx) = tokio::sync::mpsc::channel::<()>(1);

    // broadcast channel for shutdown signaling
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let state = Arc::new(AppState {
        store: store.clone(),
        clock,
        checkpoint_tx,
        config: config.clone(),
    });

    // Durability worker: checkpoints when nudged by an accepted PUT and on a
    // timer, and writes one last checkpoint on shutdown. A failed write only
    // warns; the service keeps serving from memory and the previous complete
    // checkpoint stays intact.
    {
        let store = store.clone();
        let checkpointer = checkpointer.clone();
        let mut shutdown_sub = shutdown_tx.subscribe();
        let mut interval = tokio::time::interval(config.checkpoint_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_sub.recv() => {
                        if let Err(e) = checkpointer.checkpoint(&store.read_all()).await {
                            warn!("final checkpoint failed: {e:#}");
                        }
                        break;
                    }
                    _ = interval.tick() => {}
                    Some(_) = checkpoint_rx.recv() => {}
                }
                if let Err(e) = checkpointer.checkpoint(&store.read_all()).await {
                    warn!("checkpoint failed: {e:#}");
                }
            }
        });
    }

    // Eviction monitor: drops stations that have gone silent for longer than
    // the liveness timeout.
    {
        let store = store.clone();
        let mut shutdown_sub = shutdown_tx.subscribe();
        let timeout = config.liveness_timeout;
        let mut interval = tokio::time::interval(config.eviction_interval);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_sub.recv() => break,
                    _ = interval.tick() => {
                        let evicted = store.evict_idle(timeout);
                        if !evicted.is_empty() {
                            debug!(?evicted, "evicted silent stations");
                        }
                    }
                }
            }
        });
    }

    // run HTTP server in background; it will be shut down via broadcast signal
    let http_state = state.clone();
    let http_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = api::http::run(http_state, http_shutdown).await {
            warn!("http server error: {e:#}");
        }
    });

    // wait for CTRL-C then signal shutdown
    tokio::signal::ctrl_c().await?;
    let _ = shutdown_tx.send(());
    Ok(())
}
