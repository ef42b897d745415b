pub mod processor;
pub mod queue;
pub mod runtime;
pub mod worker;

pub use processor::balancer::select_least_loaded;
pub use processor::dispatcher::{WorkItem, WorkerBlockDispatcher};
pub use processor::health::HealthSampler;
pub use processor::worker_pool::WorkerPool;
pub use queue::{QueueError, QueueSlot, TaskHandle, TaskQueue};
pub use runtime::config::{
    AssignmentStrategy, DispatcherConfig, DispatcherConfigBuilder, DispatcherConfigParams,
};
pub use runtime::fatal::{FatalErrorHandler, ProcessExit, StdProcessExit, FATAL_EXIT_CODE};
pub use runtime::hooks::{BlockHooks, HookFuture};
pub use runtime::progress::{BufferFence, BufferedHeight};
pub use runtime::protocol::{BlockStage, DispatchError, StageContext};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, DispatcherEvent, Telemetry, TelemetrySnapshot};
pub use worker::{
    BlockHeader, BlockIndexer, IndexerWorker, ProcessBlockResponse, ThreadWorker, WorkerError,
    WorkerStatus,
};
