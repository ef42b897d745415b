//! Worker block dispatcher.
//!
//! `WorkerBlockDispatcher` hands block heights to a fixed pool of indexer
//! workers and drives each height through fetch, the pre-process hook, worker
//! processing, and the post-process hook:
//! - fetches start as soon as a height is assigned and run in parallel across
//!   workers;
//! - processing goes through a bounded FIFO [`TaskQueue`] whose concurrency
//!   is configured separately from the worker count;
//! - every assignment is fenced against the shared [`BufferedHeight`], so a
//!   buffer reset discards work that was in flight when it happened;
//! - unavailable blocks and flushed tasks are expected outcomes, anything
//!   else stops the process through the [`FatalErrorHandler`].
//!
//! The per-block pipeline lives in `pipeline`.

mod pipeline;


use super::balancer;
use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::worker_pool::WorkerPool;
use crate::queue::TaskQueue;
use crate::runtime::config::{AssignmentStrategy, DispatcherConfig};
use crate::runtime::fatal::{FatalErrorHandler, ProcessExit, StdProcessExit};
use crate::runtime::hooks::BlockHooks;
use crate::runtime::progress::BufferedHeight;
use crate::runtime::protocol::DispatchError;
use crate::runtime::telemetry::Telemetry;
use crate::worker::{BlockHeader, IndexerWorker, WorkerStatus};
use anyhow::{bail, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

/// One item handed over by the buffering pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Height(u64),
    /// A block fetched outside the worker pool. Always rejected.
    Block(BlockHeader),
}

impl From<u64> for WorkItem {
    fn from(height: u64) -> Self {
        WorkItem::Height(height)
    }
}

/// State shared between the dispatcher and the tasks it spawns.
pub(crate) struct DispatcherShared<H: BlockHooks> {
    config: DispatcherConfig,
    hooks: Arc<H>,
    pool: OnceLock<Arc<WorkerPool>>,
    queue: TaskQueue,
    buffered: Arc<BufferedHeight>,
    telemetry: Arc<Telemetry>,
    fatal_handler: FatalErrorHandler,
    shutdown_root: CancellationToken,
    shut_down: AtomicBool,
    next_worker: AtomicUsize,
}

impl<H: BlockHooks> DispatcherShared<H> {
    fn pool(&self) -> Result<&Arc<WorkerPool>, DispatchError> {
        self.pool.get().ok_or(DispatchError::NotInitialized)
    }

    /// Set by `shutdown` and by a fatal error.
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst) || self.shutdown_root.is_cancelled()
    }
}

pub struct WorkerBlockDispatcher<H: BlockHooks> {
    shared: Arc<DispatcherShared<H>>,
    lifecycle: AsyncMutex<Option<LifecycleHandles>>,
}

impl<H: BlockHooks> WorkerBlockDispatcher<H> {
    /// Creates a dispatcher that exits the process on unrecoverable errors.
    ///
    /// Must be called inside a tokio runtime. Workers are created by [`Self::init`].
    pub fn new(config: DispatcherConfig, hooks: Arc<H>) -> Self {
        Self::with_process_exit(config, hooks, Arc::new(StdProcessExit))
    }

    /// Same as [`Self::new`] with a custom process exit.
    pub fn with_process_exit(
        config: DispatcherConfig,
        hooks: Arc<H>,
        exit: Arc<dyn ProcessExit>,
    ) -> Self {
        let shutdown_root = CancellationToken::new();
        let queue = TaskQueue::new(
            Some(config.queue_capacity()),
            config.processing_concurrency(),
            config.task_timeout(),
        );
        let fatal_handler = FatalErrorHandler::new(shutdown_root.clone(), exit);

        Self {
            shared: Arc::new(DispatcherShared {
                config,
                hooks,
                pool: OnceLock::new(),
                queue,
                buffered: Arc::new(BufferedHeight::default()),
                telemetry: Arc::new(Telemetry::default()),
                fatal_handler,
                shutdown_root,
                shut_down: AtomicBool::new(false),
                next_worker: AtomicUsize::new(0),
            }),
            lifecycle: AsyncMutex::new(None),
        }
    }

    /// Spawns the worker pool through `factory` and starts the health sampler
    /// and metrics reporter. Can only succeed once.
    pub async fn init<F, Fut, W>(&self, factory: F) -> Result<()>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<W>>,
        W: IndexerWorker + 'static,
    {
        if self.shared.is_shut_down() {
            bail!("cannot initialize a dispatcher that has been shut down");
        }
        let mut lifecycle = self.lifecycle.lock().await;
        if self.shared.pool.get().is_some() {
            return Err(DispatchError::AlreadyInitialized.into());
        }

        let pool = Arc::new(WorkerPool::spawn(self.shared.config.worker_count(), factory).await?);
        if self.shared.pool.set(Arc::clone(&pool)).is_err() {
            pool.terminate_all().await;
            return Err(DispatchError::AlreadyInitialized.into());
        }

        *lifecycle = Some(LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: &self.shared.shutdown_root,
            telemetry: Arc::clone(&self.shared.telemetry),
            pool: Arc::clone(&pool),
            health_check_interval: self.shared.config.health_check_interval(),
            metrics_interval: self.shared.config.metrics_interval(),
        }));

        tracing::info!(
            workers = pool.len(),
            queue_capacity = self.shared.config.queue_capacity(),
            processing_concurrency = self.shared.config.processing_concurrency(),
            assignment = %self.shared.config.assignment(),
            "worker block dispatcher initialized"
        );
        Ok(())
    }

    /// Enqueues a batch handed over by the buffering pipeline.
    ///
    /// Only heights are accepted. An empty batch with a known `latest` height
    /// is replaced by that single height so progress keeps moving. The latest
    /// buffered height becomes `latest`, or the last height of the batch,
    /// even after shutdown when nothing is assigned any more.
    pub async fn enqueue_blocks(&self, items: Vec<WorkItem>, latest: Option<u64>) -> Result<()> {
        let mut heights = Vec::with_capacity(items.len());
        for item in items {
            match item {
                WorkItem::Height(height) => heights.push(height),
                WorkItem::Block(header) => {
                    return Err(DispatchError::MaterializedBlock {
                        height: header.height(),
                    }
                    .into())
                }
            }
        }
        self.enqueue_heights(heights, latest).await
    }

    pub async fn enqueue_heights(&self, mut heights: Vec<u64>, latest: Option<u64>) -> Result<()> {
        if self.shared.is_shut_down() {
            tracing::debug!(blocks = heights.len(), "dispatcher shut down; ignoring batch");
            if let Some(height) = latest.or_else(|| heights.last().copied()) {
                self.set_latest_buffered_height(height);
            }
            return Ok(());
        }

        if heights.is_empty() {
            match latest {
                Some(height) => heights.push(height),
                None => return Ok(()),
            }
        }

        let pool = Arc::clone(self.shared.pool()?);
        let first = heights[0];
        let last = heights[heights.len() - 1];
        tracing::info!(
            blocks = heights.len(),
            first,
            last,
            latest = ?latest,
            "enqueueing blocks"
        );

        match self.shared.config.assignment() {
            AssignmentStrategy::WholeBatch => {
                let worker_index = balancer::select_worker(&pool).await?;
                for &height in &heights {
                    self.assign(height, worker_index)?;
                }
            }
            AssignmentStrategy::RoundRobin => {
                for &height in &heights {
                    let worker_index =
                        self.shared.next_worker.fetch_add(1, Ordering::Relaxed) % pool.len();
                    self.assign(height, worker_index)?;
                }
            }
        }

        self.set_latest_buffered_height(latest.unwrap_or(last));
        Ok(())
    }

    /// Hands `height` to the worker at `worker_index`. Does nothing once the
    /// dispatcher is shut down.
    pub fn assign(&self, height: u64, worker_index: usize) -> Result<()> {
        self.shared.assign(height, worker_index)
    }

    /// Records the latest buffered height and publishes the queue size.
    pub fn set_latest_buffered_height(&self, height: u64) {
        if self.shared.buffered.set(height) {
            tracing::info!(
                height,
                "latest buffered height moved back; in-flight blocks will be discarded"
            );
        }
        self.shared
            .telemetry
            .record_queue_size(self.shared.queue.pending());
    }

    /// Stops assigning work, flushes the queue, and terminates every worker.
    /// Only the first call has any effect.
    pub async fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            tracing::warn!("worker block dispatcher already shut down");
            return;
        }

        tracing::info!(
            pending = self.shared.queue.pending(),
            running = self.shared.queue.running(),
            "shutting down worker block dispatcher"
        );
        self.shared.shutdown_root.cancel();
        self.shared.queue.abort();

        if let Some(lifecycle) = self.lifecycle.lock().await.take() {
            lifecycle.shutdown().await;
        }
        if let Some(pool) = self.shared.pool.get() {
            pool.terminate_all().await;
        }
        tracing::info!("worker block dispatcher shut down");
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    pub fn latest_buffered_height(&self) -> Option<u64> {
        self.shared.buffered.latest()
    }

    /// Shared handle to the latest buffered height, used by the buffering
    /// pipeline to reset it.
    pub fn buffered_height(&self) -> Arc<BufferedHeight> {
        Arc::clone(&self.shared.buffered)
    }

    /// Processing tasks waiting to start.
    pub fn queue_size(&self) -> usize {
        self.shared.queue.pending()
    }

    /// Processing tasks the queue can still admit.
    pub fn free_size(&self) -> usize {
        self.shared.queue.free_space().unwrap_or_default()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.pool.get().map_or(0, |pool| pool.len())
    }

    pub async fn worker_statuses(&self) -> Result<Vec<WorkerStatus>> {
        let pool = self.shared.pool()?;
        pool.statuses().await.into_iter().collect()
    }

    pub async fn worker_memory_remaining(&self) -> Result<Vec<u64>> {
        self.shared.pool()?.memory_remaining().await
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.shared.telemetry)
    }

    /// Error that stopped the dispatcher, if any.
    pub fn fatal_error(&self) -> Option<anyhow::Error> {
        self.shared.fatal_handler.error()
    }

    /// Cancelled on shutdown and on a fatal error.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.shutdown_root.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }
}
