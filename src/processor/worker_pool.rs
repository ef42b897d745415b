//! Fixed-size arena of indexer workers.
//!
//! The pool is created once, addressed by index, and terminated once. The
//! dispatcher is its only owner and the only component that may terminate it.

use crate::runtime::protocol::DispatchError;
use crate::worker::{IndexerWorker, WorkerStatus};
use anyhow::{Context, Result};
use futures::future::{join_all, try_join_all};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct WorkerPool {
    workers: Vec<Arc<dyn IndexerWorker>>,
    terminated: AtomicBool,
}

impl WorkerPool {
    /// Creates `count` workers concurrently through `factory`, which receives
    /// the pool index of the worker it builds.
    pub async fn spawn<F, Fut, W>(count: usize, mut factory: F) -> Result<Self>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<W>>,
        W: IndexerWorker + 'static,
    {
        let pending = (0..count).map(|index| {
            let creating = factory(index);
            async move {
                let worker = creating
                    .await
                    .with_context(|| format!("failed to create worker {index}"))?;
                Ok::<_, anyhow::Error>(Arc::new(worker) as Arc<dyn IndexerWorker>)
            }
        });
        let workers = try_join_all(pending).await?;

        tracing::debug!(workers = workers.len(), "worker pool created");
        Ok(Self {
            workers,
            terminated: AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<Arc<dyn IndexerWorker>, DispatchError> {
        self.workers
            .get(index)
            .cloned()
            .ok_or(DispatchError::UnknownWorker {
                index,
                pool_size: self.workers.len(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn IndexerWorker>> {
        self.workers.iter()
    }

    /// Polls every worker concurrently. Results are in pool order.
    pub async fn statuses(&self) -> Vec<Result<WorkerStatus>> {
        join_all(self.workers.iter().map(|worker| worker.status())).await
    }

    /// Remaining memory budget of every worker, in pool order.
    pub async fn memory_remaining(&self) -> Result<Vec<u64>> {
        try_join_all(self.workers.iter().map(|worker| async move {
            worker
                .memory_remaining()
                .await
                .with_context(|| format!("failed to query memory of worker {}", worker.id()))
        }))
        .await
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Terminates every worker concurrently and waits for all of them.
    ///
    /// Returns the exit code of each worker in pool order, or `None` if the
    /// pool was already terminated.
    pub async fn terminate_all(&self) -> Option<Vec<Result<i32>>> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            tracing::warn!("worker pool already terminated; skipping");
            return None;
        }

        let results = join_all(self.workers.iter().map(|worker| worker.terminate())).await;
        for (worker, result) in self.workers.iter().zip(&results) {
            match result {
                Ok(code) if *code == 0 => {
                    tracing::debug!(worker = worker.id(), "worker exited cleanly")
                }
                Ok(code) => {
                    tracing::warn!(worker = worker.id(), code, "worker exited with non-zero code")
                }
                Err(err) => {
                    tracing::warn!(worker = worker.id(), error = %err, "failed to terminate worker")
                }
            }
        }

        Some(results)
    }
}
