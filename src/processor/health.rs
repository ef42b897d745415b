//! Periodic worker status sampling for observability.

use super::worker_pool::WorkerPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct HealthSampler;

impl HealthSampler {
    /// Spawns a loop that logs the status of every worker once per `interval`
    /// until `shutdown` is cancelled. The first sample is taken one interval
    /// after the spawn.
    pub fn spawn(
        pool: Arc<WorkerPool>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("health sampler shutting down");
                        break;
                    }
                    _ = ticker.tick() => sample(&pool).await,
                }
            }
        })
    }
}

/// Polls workers one after another; a failing worker does not stop the round.
async fn sample(pool: &WorkerPool) {
    for (index, worker) in pool.iter().enumerate() {
        match worker.status().await {
            Ok(status) => tracing::info!(
                worker = index,
                worker_id = status.worker_id,
                fetched = status.fetched_blocks,
                to_fetch = status.to_fetch_blocks,
                indexing = status.is_indexing,
                "worker health"
            ),
            Err(err) => tracing::warn!(
                worker = index,
                error = %err,
                "failed to sample worker status"
            ),
        }
    }
}
