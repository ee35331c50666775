//! Background and scoped flushing of the result store

use crate::store::ResultStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Flushes the store when dropped, so every exit path of the process
/// attempts to persist the final state.
pub struct FlushGuard {
    store: Arc<ResultStore>,
}

impl FlushGuard {
    pub fn new(store: Arc<ResultStore>) -> Self {
        Self { store }
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        info!("Persisting result store before exit");
        self.store.flush();
    }
}

/// Flush the store every `interval` while it has unsaved commits.
///
/// The task stops when `shutdown` turns true or its sender is dropped, after
/// one last flush. A zero interval disables the periodic flush.
pub fn spawn_periodic_flush(
    store: Arc<ResultStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if interval.is_zero() {
            debug!("Periodic flush disabled");
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if store.is_dirty() {
                        flush_blocking(&store).await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        flush_blocking(&store).await;
        debug!("Periodic flush task stopped");
    })
}

async fn flush_blocking(store: &Arc<ResultStore>) {
    let store = store.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || store.flush()).await {
        error!("Flush task panicked: {}", e);
    }
}
