use core::fmt;

/// Enumerates the stages a block passes through once assigned to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStage {
    Fetch,
    PreProcess,
    Process,
    PostProcess,
}

impl fmt::Display for BlockStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockStage::Fetch => "fetch",
            BlockStage::PreProcess => "pre-process",
            BlockStage::Process => "process",
            BlockStage::PostProcess => "post-process",
        };
        f.write_str(name)
    }
}

/// Context attached to every per-block failure so the fatal path can report
/// where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageContext {
    pub stage: BlockStage,
    pub height: u64,
}

impl StageContext {
    pub fn new(stage: BlockStage, height: u64) -> Self {
        Self { stage, height }
    }

    /// Finds the stage context anywhere in `error`.
    pub fn find(error: &anyhow::Error) -> Option<StageContext> {
        error.downcast_ref::<StageContext>().copied()
    }
}

impl fmt::Display for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to {} block {}", self.stage, self.height)
    }
}

/// Misuse of the dispatcher itself, as opposed to failures while indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Only heights may be enqueued; fetching happens on the worker.
    MaterializedBlock { height: u64 },
    UnknownWorker { index: usize, pool_size: usize },
    NotInitialized,
    AlreadyInitialized,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::MaterializedBlock { height } => write!(
                f,
                "worker dispatcher only accepts block heights, got a fetched block at {height}"
            ),
            DispatchError::UnknownWorker { index, pool_size } => {
                write!(f, "worker {index} not found in pool of {pool_size}")
            }
            DispatchError::NotInitialized => write!(f, "worker pool has not been initialized"),
            DispatchError::AlreadyInitialized => {
                write!(f, "worker pool has already been initialized")
            }
        }
    }
}

impl std::error::Error for DispatchError {}
