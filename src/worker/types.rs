use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use std::fmt;

/// Header metadata returned by a worker once it has fetched a block.
///
/// The block body itself stays inside the worker that fetched it; only this
/// summary crosses the worker boundary so the buffering hooks can inspect it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    height: u64,
    block_hash: BlockHash,
    parent_hash: BlockHash,
    timestamp: Option<u32>,
}

impl BlockHeader {
    pub fn new(height: u64, block_hash: BlockHash, parent_hash: BlockHash) -> Self {
        Self {
            height,
            block_hash,
            parent_hash,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn block_hash(&self) -> &BlockHash {
        &self.block_hash
    }

    pub fn parent_hash(&self) -> &BlockHash {
        &self.parent_hash
    }

    pub fn timestamp(&self) -> Option<u32> {
        self.timestamp
    }

    /// Whether `self` directly extends `previous`.
    pub fn extends(&self, previous: &BlockHeader) -> bool {
        self.height == previous.height.saturating_add(1) && self.parent_hash == previous.block_hash
    }

    /// Header with all-zero hashes, used where only the height matters.
    pub fn at_height(height: u64) -> Self {
        Self::new(height, BlockHash::all_zeros(), BlockHash::all_zeros())
    }
}

/// Outcome reported by a worker after it processed a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessBlockResponse {
    /// New dynamic datasources were created; the buffer must be re-planned.
    pub dynamic_ds_created: bool,
    /// Processing asked the pipeline to rewind and resume from this height.
    pub reindex_block_height: Option<u64>,
}

/// Point-in-time snapshot of one worker's queue depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatus {
    pub worker_id: usize,
    pub fetched_blocks: usize,
    pub to_fetch_blocks: usize,
    pub is_indexing: bool,
}

impl WorkerStatus {
    /// Backlog used by the load balancer.
    pub fn backlog(&self) -> usize {
        self.to_fetch_blocks
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The block cannot be retrieved yet (not produced, pruned, or the source
    /// is lagging). Expected; the caller retries on a later cycle.
    BlockUnavailable { height: u64 },
    BlockNotFetched { worker: usize, height: u64 },
    Disconnected { worker: usize },
    AlreadyTerminated { worker: usize },
}

impl WorkerError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, WorkerError::BlockUnavailable { .. })
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::BlockUnavailable { height } => {
                write!(f, "block {height} is not available yet")
            }
            WorkerError::BlockNotFetched { worker, height } => {
                write!(f, "worker {worker} was asked to process block {height} before fetching it")
            }
            WorkerError::Disconnected { worker } => {
                write!(f, "worker {worker} is no longer reachable")
            }
            WorkerError::AlreadyTerminated { worker } => {
                write!(f, "worker {worker} was already terminated")
            }
        }
    }
}

impl std::error::Error for WorkerError {}

/// Returns true when any error in the chain reports a block that cannot be
/// retrieved yet.
pub fn is_block_unavailable(error: &anyhow::Error) -> bool {
    if let Some(worker_error) = error.downcast_ref::<WorkerError>() {
        return worker_error.is_unavailable();
    }
    error.chain().any(|cause| {
        cause
            .downcast_ref::<WorkerError>()
            .is_some_and(WorkerError::is_unavailable)
    })
}
