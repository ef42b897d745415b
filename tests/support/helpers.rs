use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{bail, Result};
use blockdispatch::{
    BlockHeader, BlockHooks, DispatcherConfig, HookFuture, ProcessBlockResponse, ProcessExit,
    Telemetry, ThreadWorker, WorkerBlockDispatcher,
};
use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing_subscriber::EnvFilter;

use super::mock_indexer::{ChainIndexer, MockChain};

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub const WORKER_MEMORY_BUDGET: u64 = 64 * 1024 * 1024;

/// Buffering hooks that remember every header they saw.
#[derive(Default)]
pub struct RecordingHooks {
    pre: Mutex<Vec<BlockHeader>>,
    post: Mutex<Vec<(BlockHeader, ProcessBlockResponse)>>,
}

impl RecordingHooks {
    pub async fn pre_heights(&self) -> Vec<u64> {
        self.pre.lock().await.iter().map(BlockHeader::height).collect()
    }

    pub async fn post_heights(&self) -> Vec<u64> {
        self.post
            .lock()
            .await
            .iter()
            .map(|(header, _)| header.height())
            .collect()
    }

    pub async fn applied_headers(&self) -> Vec<BlockHeader> {
        self.post
            .lock()
            .await
            .iter()
            .map(|(header, _)| header.clone())
            .collect()
    }
}

impl BlockHooks for RecordingHooks {
    fn pre_process_block<'a>(&'a self, header: &'a BlockHeader) -> HookFuture<'a> {
        Box::pin(async move {
            self.pre.lock().await.push(header.clone());
            Ok(())
        })
    }

    fn post_process_block<'a>(
        &'a self,
        header: &'a BlockHeader,
        response: ProcessBlockResponse,
    ) -> HookFuture<'a> {
        Box::pin(async move {
            self.post.lock().await.push((header.clone(), response));
            Ok(())
        })
    }
}

/// Records exit requests instead of ending the test process.
#[derive(Default)]
pub struct RecordingExit {
    codes: StdMutex<Vec<i32>>,
}

impl RecordingExit {
    pub fn codes(&self) -> Vec<i32> {
        self.codes.lock().unwrap().clone()
    }
}

impl ProcessExit for RecordingExit {
    fn exit(&self, code: i32) {
        self.codes.lock().unwrap().push(code);
    }
}

pub struct ThreadPipeline {
    pub dispatcher: Arc<WorkerBlockDispatcher<RecordingHooks>>,
    pub hooks: Arc<RecordingHooks>,
    pub exit: Arc<RecordingExit>,
    pub chain: Arc<MockChain>,
}

/// Builds a dispatcher backed by one [`ThreadWorker`] per configured worker,
/// all indexing the same mock chain.
pub async fn thread_pipeline(
    config: DispatcherConfig,
    chain: Arc<MockChain>,
) -> Result<ThreadPipeline> {
    let hooks = Arc::new(RecordingHooks::default());
    let exit = Arc::new(RecordingExit::default());
    let dispatcher = Arc::new(WorkerBlockDispatcher::with_process_exit(
        config,
        hooks.clone(),
        exit.clone(),
    ));

    dispatcher
        .init(|index| {
            let indexer = ChainIndexer::new(chain.clone());
            async move { ThreadWorker::spawn(index, indexer, WORKER_MEMORY_BUDGET) }
        })
        .await?;

    Ok(ThreadPipeline {
        dispatcher,
        hooks,
        exit,
        chain,
    })
}

pub async fn wait_for_applied(telemetry: &Telemetry, expected: u64, limit: Duration) -> Result<()> {
    let deadline = Instant::now() + limit;
    loop {
        let applied = telemetry.applied_blocks();
        if applied >= expected {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for {expected} applied blocks (saw {applied})");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_exit(exit: &RecordingExit, limit: Duration) -> Result<()> {
    let deadline = Instant::now() + limit;
    while exit.codes().is_empty() {
        if Instant::now() >= deadline {
            bail!("timed out waiting for a fatal exit");
        }
        sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

pub fn assert_is_chain(headers: &[BlockHeader]) {
    for pair in headers.windows(2) {
        assert!(
            pair[1].extends(&pair[0]),
            "block {} does not extend block {}",
            pair[1].height(),
            pair[0].height()
        );
    }
}
