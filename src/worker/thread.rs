use super::handle::IndexerWorker;
use super::types::{BlockHeader, ProcessBlockResponse, WorkerError, WorkerStatus};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

const REQUEST_CHANNEL_CAPACITY: usize = 64;

pub const EXIT_OK: i32 = 0;
pub const EXIT_RUNTIME_FAILED: i32 = 1;
pub const EXIT_PANICKED: i32 = 101;

/// Block retrieval and execution logic hosted inside a [`ThreadWorker`].
pub trait BlockIndexer: Send + Sync + 'static {
    type Block: Send + 'static;

    /// Retrieve the block at `height`. Return
    /// [`WorkerError::BlockUnavailable`] when it does not exist yet.
    fn fetch_block(&self, height: u64) -> BoxFuture<'_, Result<Self::Block>>;

    fn header(&self, block: &Self::Block) -> BlockHeader;

    fn index_block(
        &self,
        height: u64,
        block: Self::Block,
    ) -> BoxFuture<'_, Result<ProcessBlockResponse>>;

    /// Bytes currently retained by the indexer.
    fn memory_used(&self) -> u64 {
        0
    }
}

enum WorkerRequest {
    Fetch {
        height: u64,
        reply: oneshot::Sender<Result<BlockHeader>>,
    },
    Process {
        height: u64,
        reply: oneshot::Sender<Result<ProcessBlockResponse>>,
    },
    Release {
        height: u64,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<WorkerStatus>,
    },
    MemoryRemaining {
        reply: oneshot::Sender<u64>,
    },
    Terminate,
}

/// Worker hosted on its own OS thread with a private single-threaded runtime.
///
/// Fetches run concurrently inside the worker; processing is serialized.
/// Fetched blocks stay cached in the worker until `process_block` consumes
/// them or `release_block` drops them.
pub struct ThreadWorker {
    id: usize,
    requests: mpsc::Sender<WorkerRequest>,
    thread: Mutex<Option<thread::JoinHandle<Result<()>>>>,
}

impl ThreadWorker {
    pub fn spawn<B: BlockIndexer>(id: usize, indexer: B, memory_budget: u64) -> Result<Self> {
        let (requests, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let thread = thread::Builder::new()
            .name(format!("indexer-worker-{id}"))
            .spawn(move || -> Result<()> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .with_context(|| format!("failed to build runtime for worker {id}"))?;
                runtime.block_on(serve(id, Arc::new(indexer), memory_budget, request_rx));
                Ok(())
            })
            .with_context(|| format!("failed to spawn thread for worker {id}"))?;

        tracing::debug!(worker = id, "indexer worker spawned");
        Ok(Self {
            id,
            requests,
            thread: Mutex::new(Some(thread)),
        })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> WorkerRequest,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| WorkerError::Disconnected { worker: self.id })?;
        response
            .await
            .map_err(|_| WorkerError::Disconnected { worker: self.id }.into())
    }
}

impl IndexerWorker for ThreadWorker {
    fn id(&self) -> usize {
        self.id
    }

    fn fetch_block(&self, height: u64) -> BoxFuture<'_, Result<BlockHeader>> {
        Box::pin(async move {
            self.request(|reply| WorkerRequest::Fetch { height, reply })
                .await?
        })
    }

    fn process_block(&self, height: u64) -> BoxFuture<'_, Result<ProcessBlockResponse>> {
        Box::pin(async move {
            self.request(|reply| WorkerRequest::Process { height, reply })
                .await?
        })
    }

    fn release_block(&self, height: u64) -> BoxFuture<'_, Result<bool>> {
        Box::pin(self.request(move |reply| WorkerRequest::Release { height, reply }))
    }

    fn status(&self) -> BoxFuture<'_, Result<WorkerStatus>> {
        Box::pin(self.request(|reply| WorkerRequest::Status { reply }))
    }

    fn memory_remaining(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.request(|reply| WorkerRequest::MemoryRemaining { reply }))
    }

    fn terminate(&self) -> BoxFuture<'_, Result<i32>> {
        Box::pin(async move {
            let handle = self.thread.lock().unwrap().take();
            let handle = handle.ok_or(WorkerError::AlreadyTerminated { worker: self.id })?;

            if self.requests.send(WorkerRequest::Terminate).await.is_err() {
                tracing::debug!(worker = self.id, "worker loop stopped before terminate");
            }

            let joined = tokio::task::spawn_blocking(move || handle.join())
                .await
                .with_context(|| format!("failed to join thread of worker {}", self.id))?;

            let code = match joined {
                Ok(Ok(())) => EXIT_OK,
                Ok(Err(err)) => {
                    tracing::error!(worker = self.id, error = %err, "worker runtime failed");
                    EXIT_RUNTIME_FAILED
                }
                Err(panic_payload) => {
                    tracing::error!(
                        worker = self.id,
                        panic = %panic_message(panic_payload.as_ref()),
                        "worker thread panicked"
                    );
                    EXIT_PANICKED
                }
            };
            tracing::debug!(worker = self.id, code, "indexer worker terminated");
            Ok(code)
        })
    }
}

struct WorkerState<B: BlockIndexer> {
    fetched: Mutex<HashMap<u64, B::Block>>,
    to_fetch: AtomicUsize,
    indexing: AtomicBool,
    index_lock: AsyncMutex<()>,
}

impl<B: BlockIndexer> WorkerState<B> {
    fn new() -> Self {
        Self {
            fetched: Mutex::new(HashMap::new()),
            to_fetch: AtomicUsize::new(0),
            indexing: AtomicBool::new(false),
            index_lock: AsyncMutex::new(()),
        }
    }

    fn status(&self, worker_id: usize) -> WorkerStatus {
        WorkerStatus {
            worker_id,
            fetched_blocks: self.fetched.lock().unwrap().len(),
            to_fetch_blocks: self.to_fetch.load(Ordering::SeqCst),
            is_indexing: self.indexing.load(Ordering::SeqCst),
        }
    }
}

async fn serve<B: BlockIndexer>(
    id: usize,
    indexer: Arc<B>,
    memory_budget: u64,
    mut requests: mpsc::Receiver<WorkerRequest>,
) {
    let state = Arc::new(WorkerState::<B>::new());

    while let Some(request) = requests.recv().await {
        match request {
            WorkerRequest::Fetch { height, reply } => {
                state.to_fetch.fetch_add(1, Ordering::SeqCst);
                let indexer = Arc::clone(&indexer);
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let outcome = match indexer.fetch_block(height).await {
                        Ok(block) => {
                            let header = indexer.header(&block);
                            state.fetched.lock().unwrap().insert(height, block);
                            Ok(header)
                        }
                        Err(err) => Err(err),
                    };
                    state.to_fetch.fetch_sub(1, Ordering::SeqCst);
                    let _ = reply.send(outcome);
                });
            }
            WorkerRequest::Process { height, reply } => {
                let indexer = Arc::clone(&indexer);
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let _serial = state.index_lock.lock().await;
                    let block = state.fetched.lock().unwrap().remove(&height);
                    let outcome = match block {
                        Some(block) => {
                            state.indexing.store(true, Ordering::SeqCst);
                            let result = indexer.index_block(height, block).await;
                            state.indexing.store(false, Ordering::SeqCst);
                            result
                        }
                        None => Err(WorkerError::BlockNotFetched { worker: id, height }.into()),
                    };
                    let _ = reply.send(outcome);
                });
            }
            WorkerRequest::Release { height, reply } => {
                let evicted = state.fetched.lock().unwrap().remove(&height).is_some();
                if evicted {
                    tracing::trace!(worker = id, height, "released unprocessed block");
                }
                let _ = reply.send(evicted);
            }
            WorkerRequest::Status { reply } => {
                let _ = reply.send(state.status(id));
            }
            WorkerRequest::MemoryRemaining { reply } => {
                let _ = reply.send(memory_budget.saturating_sub(indexer.memory_used()));
            }
            WorkerRequest::Terminate => {
                tracing::debug!(worker = id, "terminate requested; leaving request loop");
                break;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
