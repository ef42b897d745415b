//! Worker module split across focused submodules:
//! - `types`: headers, process responses, status snapshots, worker errors
//! - `handle`: the `IndexerWorker` capability trait the dispatcher talks to
//! - `thread`: `ThreadWorker`, a worker hosted on a dedicated OS thread
//! - `tests`: worker integration/unit tests

mod handle;
mod thread;
mod types;


pub use handle::IndexerWorker;
pub use thread::{BlockIndexer, ThreadWorker, EXIT_OK, EXIT_PANICKED, EXIT_RUNTIME_FAILED};
pub use types::{is_block_unavailable, BlockHeader, ProcessBlockResponse, WorkerError, WorkerStatus};
