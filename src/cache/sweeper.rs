//! Background Expiration Sweeper
//!
//! Expired entries are always rejected on read, but persistent tiers keep
//! them on disk until something deletes them. The sweeper calls
//! `purge_expired` on a fixed interval so space is reclaimed without
//! waiting for reads.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::provider::CacheProvider;

/// Handle to a running sweeper task
pub struct SweeperHandle {
    token: CancellationToken,
    task: JoinHandle<u64>,
}

impl SweeperHandle {
    /// Ask the sweeper to stop after its current pass
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the sweeper task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the sweeper and wait for it; returns the total entries purged
    pub async fn shutdown(self) -> u64 {
        self.token.cancel();
        match self.task.await {
            Ok(total) => total,
            Err(e) => {
                error!("sweeper task failed: {}", e);
                0
            }
        }
    }
}

/// Spawn a sweeper on the current tokio runtime
///
/// The first pass runs immediately.
pub fn spawn_sweeper(cache: Arc<dyn CacheProvider>, every: Duration) -> SweeperHandle {
    let token = CancellationToken::new();
    let task = tokio::spawn(run(cache, every, token.clone()));
    SweeperHandle { token, task }
}

#[instrument(skip(cache, token), fields(kind = %cache.kind()))]
async fn run(cache: Arc<dyn CacheProvider>, every: Duration, token: CancellationToken) -> u64 {
    info!(interval_ms = every.as_millis() as u64, "starting expiration sweeper");

    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut total = 0u64;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!(total, "expiration sweeper shutting down");
                break;
            }

            _ = tick.tick() => {
                let cache = Arc::clone(&cache);
                match tokio::task::spawn_blocking(move || cache.purge_expired()).await {
                    Ok(purged) => {
                        total += purged as u64;
                        debug!(purged, "sweep pass complete");
                    }
                    Err(e) => error!("sweep pass panicked: {}", e),
                }
            }
        }
    }

    total
}

// =============================================================================
// Tests
// =============================================================================
