//! Least-loaded worker selection.

use super::worker_pool::WorkerPool;
use crate::worker::WorkerStatus;
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;

/// Returns the index of a worker with the smallest backlog, picking uniformly
/// among ties. `None` for an empty slice.
pub fn select_least_loaded<R: Rng + ?Sized>(
    statuses: &[WorkerStatus],
    rng: &mut R,
) -> Option<usize> {
    let min_backlog = statuses.iter().map(WorkerStatus::backlog).min()?;
    let candidates: Vec<usize> = statuses
        .iter()
        .enumerate()
        .filter(|(_, status)| status.backlog() == min_backlog)
        .map(|(index, _)| index)
        .collect();
    candidates.choose(rng).copied()
}

/// Polls every worker of `pool` concurrently and picks the least loaded.
pub async fn select_worker(pool: &WorkerPool) -> Result<usize> {
    let statuses = pool
        .statuses()
        .await
        .into_iter()
        .enumerate()
        .map(|(index, status)| {
            status.with_context(|| format!("failed to poll status of worker {index}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let selected = select_least_loaded(&statuses, &mut rand::thread_rng())
        .context("worker pool is empty")?;
    tracing::trace!(
        worker = selected,
        backlog = statuses[selected].backlog(),
        "selected least loaded worker"
    );
    Ok(selected)
}
