use super::types::{BlockHeader, ProcessBlockResponse, WorkerStatus};
use anyhow::Result;
use futures::future::BoxFuture;

/// Capability surface of one indexer worker living outside the dispatcher's
/// control flow (thread, subprocess, or remote node).
///
/// `fetch_block` and `process_block` for the same height must be issued
/// against the same worker: the fetched block stays cached inside the worker
/// until it is processed.
pub trait IndexerWorker: Send + Sync {
    fn id(&self) -> usize;

    /// Fetch the block at `height` and return its header. Fails with
    /// [`WorkerError::BlockUnavailable`](super::WorkerError::BlockUnavailable)
    /// when the block cannot be retrieved yet.
    fn fetch_block(&self, height: u64) -> BoxFuture<'_, Result<BlockHeader>>;

    /// Index a block previously fetched by this worker.
    fn process_block(&self, height: u64) -> BoxFuture<'_, Result<ProcessBlockResponse>>;

    /// Drop a fetched block that will never be processed. Returns whether a
    /// cached block was evicted. Workers that keep no cache can rely on the
    /// default.
    fn release_block(&self, _height: u64) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async { Ok(false) })
    }

    fn status(&self) -> BoxFuture<'_, Result<WorkerStatus>>;

    /// Bytes of memory the worker can still use before hitting its budget.
    fn memory_remaining(&self) -> BoxFuture<'_, Result<u64>>;

    /// Stop the worker and return its exit code. Call at most once.
    fn terminate(&self) -> BoxFuture<'_, Result<i32>>;
}

impl<T: IndexerWorker + ?Sized> IndexerWorker for std::sync::Arc<T> {
    fn id(&self) -> usize {
        (**self).id()
    }

    fn fetch_block(&self, height: u64) -> BoxFuture<'_, Result<BlockHeader>> {
        (**self).fetch_block(height)
    }

    fn process_block(&self, height: u64) -> BoxFuture<'_, Result<ProcessBlockResponse>> {
        (**self).process_block(height)
    }

    fn release_block(&self, height: u64) -> BoxFuture<'_, Result<bool>> {
        (**self).release_block(height)
    }

    fn status(&self) -> BoxFuture<'_, Result<WorkerStatus>> {
        (**self).status()
    }

    fn memory_remaining(&self) -> BoxFuture<'_, Result<u64>> {
        (**self).memory_remaining()
    }

    fn terminate(&self) -> BoxFuture<'_, Result<i32>> {
        (**self).terminate()
    }
}
