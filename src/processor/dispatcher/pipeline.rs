use super::DispatcherShared;
use crate::queue::{is_task_flushed, QueueError};
use crate::runtime::hooks::BlockHooks;
use crate::runtime::progress::BufferFence;
use crate::runtime::protocol::{BlockStage, StageContext};
use crate::worker::{is_block_unavailable, BlockHeader, IndexerWorker};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// How a processing task ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BlockOutcome {
    Applied,
    /// The buffer was reset after the block was assigned.
    Discarded,
}

/// Fetch started ahead of a queued processing task.
///
/// If the task is dropped before it collects the fetch (flushed, timed out),
/// the block is released on the worker once the fetch lands.
struct PendingFetch {
    height: u64,
    worker: Arc<dyn IndexerWorker>,
    task: Option<JoinHandle<Result<BlockHeader>>>,
}

impl PendingFetch {
    fn start(height: u64, worker: Arc<dyn IndexerWorker>) -> Self {
        let task = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.fetch_block(height).await }
        });
        Self {
            height,
            worker,
            task: Some(task),
        }
    }

    async fn header(&mut self) -> Result<BlockHeader> {
        let Some(task) = self.task.as_mut() else {
            return Err(anyhow!("fetch of block {} already collected", self.height));
        };
        let joined = task.await;
        self.task = None;
        joined.unwrap_or_else(|err| Err(anyhow!("fetch task aborted: {err}")))
    }
}

impl Drop for PendingFetch {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let worker = Arc::clone(&self.worker);
        let height = self.height;
        runtime.spawn(async move {
            if let Ok(Ok(_)) = task.await {
                release_block(worker.as_ref(), height).await;
            }
        });
    }
}

async fn release_block(worker: &dyn IndexerWorker, height: u64) {
    if let Err(err) = worker.release_block(height).await {
        tracing::debug!(height, worker = worker.id(), error = %err, "failed to release unprocessed block");
    }
}

impl<H: BlockHooks> DispatcherShared<H> {
    pub(super) fn assign(self: &Arc<Self>, height: u64, worker_index: usize) -> Result<()> {
        if self.is_shut_down() {
            tracing::debug!(height, worker = worker_index, "dispatcher shut down; not assigning");
            return Ok(());
        }

        let worker = match self.pool().and_then(|pool| pool.get(worker_index)) {
            Ok(worker) => worker,
            Err(err) => {
                tracing::error!(height, worker = worker_index, error = %err, "invalid block assignment");
                return Err(err.into());
            }
        };

        // Admission comes first so a rejected block is never fetched.
        let slot = match self.queue.reserve() {
            Ok(slot) => slot,
            Err(QueueError::Flushed) => {
                tracing::debug!(height, "queue flushed before block could be queued");
                self.telemetry.record_flushed_block();
                return Ok(());
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to queue block {height} for processing")))
            }
        };
        let fence = self.buffered.fence();

        // Fetching is not bounded by the queue; it overlaps with processing.
        let fetch = PendingFetch::start(height, Arc::clone(&worker));

        let task = {
            let shared = Arc::clone(self);
            async move { shared.run_block(height, worker, fence, fetch).await }
        };

        match slot.submit(task) {
            Ok(handle) => {
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = handle.await;
                    shared.settle(height, worker_index, outcome);
                });
            }
            Err(_) => {
                tracing::debug!(height, "queue flushed before block could be queued");
                self.telemetry.record_flushed_block();
            }
        }
        Ok(())
    }

    async fn run_block(
        &self,
        height: u64,
        worker: Arc<dyn IndexerWorker>,
        fence: BufferFence,
        mut fetch: PendingFetch,
    ) -> Result<BlockOutcome> {
        let header = fetch
            .header()
            .await
            .context(StageContext::new(BlockStage::Fetch, height))?;

        if self.is_shut_down() {
            release_block(worker.as_ref(), height).await;
            return Err(QueueError::Flushed.into());
        }

        if self.buffered.is_stale(fence) {
            tracing::debug!(
                height,
                worker = worker.id(),
                fenced_at = ?fence.height(),
                latest = ?self.buffered.latest(),
                "buffer was reset after assignment; discarding block"
            );
            release_block(worker.as_ref(), height).await;
            return Ok(BlockOutcome::Discarded);
        }

        self.hooks
            .pre_process_block(&header)
            .await
            .context(StageContext::new(BlockStage::PreProcess, height))?;

        let response = worker
            .process_block(height)
            .await
            .context(StageContext::new(BlockStage::Process, height))?;

        self.hooks
            .post_process_block(&header, response)
            .await
            .context(StageContext::new(BlockStage::PostProcess, height))?;

        tracing::trace!(
            height,
            worker = worker.id(),
            dynamic_ds_created = response.dynamic_ds_created,
            reindex = ?response.reindex_block_height,
            "block processed"
        );
        Ok(BlockOutcome::Applied)
    }

    fn settle(
        &self,
        height: u64,
        worker_index: usize,
        outcome: Result<Result<BlockOutcome>, QueueError>,
    ) {
        let error = match outcome {
            Ok(Ok(BlockOutcome::Applied)) => {
                self.telemetry.record_applied_block();
                return;
            }
            Ok(Ok(BlockOutcome::Discarded)) => {
                self.telemetry.record_discarded_block();
                return;
            }
            Ok(Err(err)) => err,
            Err(err) => anyhow::Error::new(err).context(format!(
                "processing of block {height} on worker {worker_index} did not complete"
            )),
        };

        if is_task_flushed(&error) {
            tracing::debug!(height, "block flushed from queue");
            self.telemetry.record_flushed_block();
            return;
        }

        if is_block_unavailable(&error) {
            tracing::debug!(height, worker = worker_index, error = %error, "block not available yet");
            self.telemetry.record_unavailable_block();
            return;
        }

        self.fatal_handler.trigger(error);
    }
}
